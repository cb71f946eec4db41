//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：输入完整上下文，输出模型原始文本。
//! 文本是最终回答还是工具调用，由 react::planner 解析。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// 模型调用的基础设施错误（网络、限流、服务端错误）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("model endpoint unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// LLM 客户端 trait：无状态，可被多个线程的对话共享
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 模型标识，用于日志
    fn model(&self) -> &str;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
