//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：ToolInvocation 走重试 / 兜底回复，其余错误直接终止本轮。

use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::{PersistenceError, PlanId};

/// 单轮对话中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 工具调用格式错误或工具执行失败；只由重试器在本地消化
    #[error("Tool invocation failed ({tool}): {reason}")]
    ToolInvocation { tool: String, reason: String },

    /// 模型基础设施故障，本层不重试
    #[error("Model unavailable: {0}")]
    ModelUnavailable(#[from] LlmError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Thread {thread_id} is busy, lock not acquired within {waited:?}")]
    LockTimeout { thread_id: String, waited: Duration },

    #[error("Turn on thread {thread_id} exceeded deadline of {deadline:?}")]
    TurnTimeout { thread_id: String, deadline: Duration },

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Travel plan not found: {0}")]
    PlanNotFound(PlanId),

    #[error("Unknown thread: {0}")]
    UnknownThread(String),

    #[error("Thread {requested} does not belong to plan {plan_id} (expected {expected})")]
    ThreadMismatch {
        requested: String,
        expected: String,
        plan_id: PlanId,
    },

    /// 首次生成计划时重试耗尽，只得到兜底回复；兜底文本不会被保存为计划
    #[error("Could not generate a travel plan for {destination}")]
    PlanGenerationFailed { destination: String },

    #[error("Agent exceeded {0} reasoning steps")]
    StepLimitExceeded(usize),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    pub fn tool(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        AgentError::ToolInvocation {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn is_tool_invocation(&self) -> bool {
        matches!(self, AgentError::ToolInvocation { .. })
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 把最近一条用户消息改写为简化形式后重试
    RetrySimplified,
    /// 重试耗尽，返回确定性的兜底回复
    Fallback,
    /// 终止本轮，错误交给调用方
    Abort,
}

/// 返回给调用方的结构化失败：带线程与目的地，便于决定是否重试
#[derive(Error, Debug)]
#[error("turn on thread {thread_id} failed: {source}")]
pub struct TurnError {
    pub thread_id: String,
    pub destination: Option<String>,
    #[source]
    pub source: AgentError,
}

impl TurnError {
    pub fn new(thread_id: impl Into<String>, destination: Option<String>, source: AgentError) -> Self {
        Self {
            thread_id: thread_id.into(),
            destination,
            source,
        }
    }

    /// 调用方稍后重试是否可能成功（锁繁忙、超时、存储抖动、模型限流）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.source,
            AgentError::LockTimeout { .. }
                | AgentError::TurnTimeout { .. }
                | AgentError::Persistence(_)
                | AgentError::ModelUnavailable(LlmError::RateLimited { .. })
        )
    }
}
