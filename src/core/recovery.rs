//! 错误恢复：RecoveryEngine 与 RetryingInvoker
//!
//! RecoveryEngine 把 AgentError 映射为 RecoveryAction；RetryingInvoker 据此驱动 Agent Graph：
//! 工具调用失败时把最近一条用户消息改写为简化提问再试，重试耗尽返回确定性的兜底回复，
//! 其余错误（模型不可用等）立即上抛且从不重试。重试总是顺序进行。

use std::sync::Arc;

use crate::core::{AgentError, RecoveryAction};
use crate::memory::{Message, Role};
use crate::react::AgentGraph;

/// 简化提问的前缀
pub const SIMPLIFIED_PREFIX: &str = "Please provide information about: ";

/// 单次调用内的重试计数，不持久化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    /// 从 0 开始
    pub attempt_index: u32,
    pub max_attempts: u32,
}

impl RetryAttempt {
    pub fn has_remaining(&self) -> bool {
        self.attempt_index + 1 < self.max_attempts
    }
}

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError, attempt: RetryAttempt) -> RecoveryAction {
        match err {
            AgentError::ToolInvocation { .. } if attempt.has_remaining() => {
                RecoveryAction::RetrySimplified
            }
            AgentError::ToolInvocation { .. } => RecoveryAction::Fallback,
            _ => RecoveryAction::Abort,
        }
    }
}

/// 把最近一条用户消息替换为简化提问；original 为未改写的对话，保证不会层层嵌套前缀
pub fn simplify_last_user(working: &mut [Message], original: &[Message]) -> bool {
    let Some(idx) = original.iter().rposition(|m| m.role == Role::User) else {
        return false;
    };
    working[idx] = Message::user(format!("{}{}", SIMPLIFIED_PREFIX, original[idx].content));
    true
}

/// 重试耗尽时的兜底回复
pub fn fallback_message(destination: &str) -> Message {
    Message::assistant(format!(
        "I apologize, but I'm having trouble processing your request about {}. \
         Please try rephrasing your question or ask something more specific about your trip plan.",
        destination
    ))
}

/// 一次 invoke 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeOutcome {
    pub final_message: Message,
    pub attempts_used: u32,
    /// 是否使用了兜底回复
    pub fell_back: bool,
}

pub struct RetryingInvoker {
    graph: Arc<AgentGraph>,
    recovery: RecoveryEngine,
    max_retries: u32,
}

impl RetryingInvoker {
    pub fn new(graph: Arc<AgentGraph>, max_retries: u32) -> Self {
        Self {
            graph,
            recovery: RecoveryEngine::new(),
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// 最多 max_retries + 1 次尝试；只有非工具错误会返回 Err
    pub async fn invoke(
        &self,
        messages: &[Message],
        destination: &str,
    ) -> Result<InvokeOutcome, AgentError> {
        let max_attempts = self.max_retries + 1;
        let mut working = messages.to_vec();

        for attempt_index in 0..max_attempts {
            let attempt = RetryAttempt {
                attempt_index,
                max_attempts,
            };
            let err = match self.graph.run(&working).await {
                Ok(final_message) => {
                    return Ok(InvokeOutcome {
                        final_message,
                        attempts_used: attempt_index + 1,
                        fell_back: false,
                    })
                }
                Err(err) => err,
            };

            match self.recovery.handle(&err, attempt) {
                RecoveryAction::RetrySimplified => {
                    tracing::warn!(
                        attempt = attempt_index + 1,
                        max_attempts,
                        error = %err,
                        "tool invocation failed, retrying with simplified message"
                    );
                    simplify_last_user(&mut working, messages);
                }
                RecoveryAction::Fallback => {
                    tracing::warn!(
                        attempts = max_attempts,
                        error = %err,
                        "retries exhausted, returning fallback response"
                    );
                    return Ok(InvokeOutcome {
                        final_message: fallback_message(destination),
                        attempts_used: attempt_index + 1,
                        fell_back: true,
                    });
                }
                RecoveryAction::Abort => return Err(err),
            }
        }

        // max_attempts >= 1 且最后一次尝试必然 Fallback 或返回，这里只为穷尽
        Ok(InvokeOutcome {
            final_message: fallback_message(destination),
            attempts_used: max_attempts,
            fell_back: true,
        })
    }
}
