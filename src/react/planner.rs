//! Planner：推理步骤与 Tool Call 解析
//!
//! 调用 LLM 得到最终回答或 JSON Tool Call；parse_llm_output 从文本中提取 JSON 并解析为一批 ToolCall。
//! 格式错误的工具调用视为 ToolInvocation（交给重试器改写提问），模型不可用视为 ModelUnavailable。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::react::prompt::system_prompt;

/// LLM 返回的 Tool Call（简化 JSON：{"tool": "get_current_weather", "args": {"city": "..."}}）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Planner 输出
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutput {
    /// 最终回答
    Response(String),
    /// 需要执行的一批工具
    ToolCalls(Vec<ToolCall>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawToolCalls {
    Batch { tool_calls: Vec<ToolCall> },
    Single(ToolCall),
}

/// 解析 LLM 输出
///
/// 以 `{` 开头的输出必须是合法的工具调用，否则报 ToolInvocation。
/// ```json 代码块只有在对象带 `tool` / `tool_calls` 键（或残缺但看得出是在调工具）时才按工具调用处理，
/// 其余文本（即便正文中含花括号或 JSON 示例）都是最终回答。
pub fn parse_llm_output(output: &str) -> Result<PlannerOutput, AgentError> {
    let trimmed = output.trim();

    let json_str = if trimmed.starts_with('{') {
        trimmed
    } else if let Some(fenced) = fenced_json(trimmed) {
        if !looks_like_tool_call(fenced) {
            return Ok(PlannerOutput::Response(trimmed.to_string()));
        }
        fenced
    } else {
        return Ok(PlannerOutput::Response(trimmed.to_string()));
    };

    let parsed: RawToolCalls = serde_json::from_str(json_str)
        .map_err(|e| AgentError::tool("tool_use_failed", format!("{}: {}", e, json_str)))?;

    match parsed {
        RawToolCalls::Batch { tool_calls } if tool_calls.is_empty() => Err(AgentError::tool(
            "tool_use_failed",
            "empty tool_calls batch",
        )),
        RawToolCalls::Batch { tool_calls } => {
            if let Some(bad) = tool_calls.iter().find(|c| c.tool.trim().is_empty()) {
                return Err(AgentError::tool("tool_use_failed", format!("missing tool name: {:?}", bad)));
            }
            Ok(PlannerOutput::ToolCalls(tool_calls))
        }
        RawToolCalls::Single(call) if call.tool.trim().is_empty() => {
            Ok(PlannerOutput::Response(trimmed.to_string()))
        }
        RawToolCalls::Single(call) => Ok(PlannerOutput::ToolCalls(vec![call])),
    }
}

fn fenced_json(text: &str) -> Option<&str> {
    let start = text.find("```json")?;
    let rest = &text[start + 7..];
    Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()))
}

/// 代码块内容是否是工具调用：合法 JSON 看顶层键，残缺 JSON 看是否出现 "tool 键名
fn looks_like_tool_call(json: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(json) {
        Ok(serde_json::Value::Object(map)) => map.contains_key("tool") || map.contains_key("tool_calls"),
        Ok(_) => false,
        Err(_) => json.contains("\"tool"),
    }
}

/// Planner：持有 LLM 与工具说明，负责拼 system + messages 后调用 LLM 并解析
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    tools_schema: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, tools_schema: impl Into<String>) -> Self {
        Self {
            llm,
            tools_schema: tools_schema.into(),
        }
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub fn model(&self) -> &str {
        self.llm.model()
    }

    /// 一次推理步骤；对话只有一条或更少消息时视为首次生成计划
    pub async fn plan(&self, messages: &[Message]) -> Result<PlannerOutput, AgentError> {
        let conversational = messages.iter().filter(|m| m.role.is_conversational()).count();
        let system = system_prompt(conversational <= 1, &self.tools_schema);

        let mut full_messages = Vec::with_capacity(messages.len() + 1);
        full_messages.push(Message::system(system));
        full_messages.extend_from_slice(messages);

        let raw = self.llm.complete(&full_messages).await?;
        parse_llm_output(&raw)
    }
}
