//! 认知层：Planner（推理步骤）、Prompt、Agent Graph 状态机

pub mod graph;
pub mod planner;
pub mod prompt;

pub use graph::{AgentGraph, GraphState};
pub use planner::{parse_llm_output, Planner, PlannerOutput, ToolCall};
