//! 核心编排层：错误与恢复、线程状态存储、会话监管、对话编排器

pub mod error;
pub mod orchestrator;
pub mod plan_request;
pub mod recovery;
pub mod session_supervisor;
pub mod thread_store;

pub use error::{AgentError, RecoveryAction, TurnError};
pub use orchestrator::{
    create_llm_from_config, ConversationOrchestrator, GeneratedPlan, OrchestratorConfig,
};
pub use plan_request::PlanRequest;
pub use recovery::{
    fallback_message, InvokeOutcome, RecoveryEngine, RetryAttempt, RetryingInvoker,
    SIMPLIFIED_PREFIX,
};
pub use session_supervisor::SessionSupervisor;
pub use thread_store::{ThreadHandle, ThreadStateStore};
