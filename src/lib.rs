//! Wayfarer - 旅行规划多轮对话编排器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 对话编排、线程状态存储、重试与兜底、会话监管
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 会话日志模型与持久化（内存 / SQLite）
//! - **observability**: 日志初始化
//! - **react**: Planner、Prompt、Agent Graph
//! - **tools**: 旅行工具集（天气、地点、汇率、费用计算）与执行器

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use crate::core::{ConversationOrchestrator, OrchestratorConfig, TurnError};
