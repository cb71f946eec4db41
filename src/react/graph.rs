//! Agent Graph：AGENT ⇄ TOOLS → END 状态机
//!
//! AGENT 调一次 Planner：有工具调用则进入 TOOLS，否则进入 END。
//! TOOLS 并发执行整批调用，按请求顺序把结果写回上下文后无条件回到 AGENT。
//! 工具错误不在此处理，原样上抛给重试器。

use futures_util::future::join_all;

use crate::core::AgentError;
use crate::memory::Message;
use crate::react::{Planner, PlannerOutput, ToolCall};
use crate::tools::ToolExecutor;

/// 状态机节点（TOOLS 携带待执行的批次，END 携带最终回答）
#[derive(Debug, Clone, PartialEq)]
pub enum GraphState {
    Agent,
    Tools(Vec<ToolCall>),
    End(String),
}

impl GraphState {
    /// AGENT 节点的条件边
    pub fn after_agent(output: PlannerOutput) -> GraphState {
        match output {
            PlannerOutput::ToolCalls(calls) => GraphState::Tools(calls),
            PlannerOutput::Response(text) => GraphState::End(text),
        }
    }
}

pub struct AgentGraph {
    planner: Planner,
    executor: ToolExecutor,
    max_steps: usize,
}

impl AgentGraph {
    pub fn new(planner: Planner, executor: ToolExecutor, max_steps: usize) -> Self {
        Self {
            planner,
            executor,
            max_steps: max_steps.max(1),
        }
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// 从 AGENT 开始运行到 END，返回最终的 assistant 消息
    pub async fn run(&self, messages: &[Message]) -> Result<Message, AgentError> {
        let mut context = messages.to_vec();
        let mut state = GraphState::Agent;
        let mut agent_steps = 0usize;

        loop {
            state = match state {
                GraphState::Agent => {
                    agent_steps += 1;
                    if agent_steps > self.max_steps {
                        return Err(AgentError::StepLimitExceeded(self.max_steps));
                    }
                    GraphState::after_agent(self.planner.plan(&context).await?)
                }
                GraphState::Tools(calls) => {
                    tracing::debug!(count = calls.len(), "dispatching tool batch");
                    let request = serde_json::json!({ "tool_calls": calls });
                    context.push(Message::assistant(request.to_string()));

                    let results = join_all(calls.iter().map(|c| self.executor.execute(c))).await;
                    for (call, result) in calls.iter().zip(results) {
                        context.push(Message::tool(&call.tool, result?));
                    }
                    GraphState::Agent
                }
                GraphState::End(text) => {
                    let (prompt_tokens, completion_tokens, _) = self.planner.token_usage();
                    tracing::debug!(
                        steps = agent_steps,
                        model = self.planner.model(),
                        prompt_tokens,
                        completion_tokens,
                        "agent graph finished"
                    );
                    return Ok(Message::assistant(text));
                }
            };
        }
    }
}
