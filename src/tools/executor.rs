//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时：解析 → 执行 → 计时，任何失败都转为 AgentError::ToolInvocation，
//! 由上层重试器统一处理；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::AgentError;
use crate::react::ToolCall;
use crate::tools::ToolRegistry;

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout,
        }
    }

    /// 执行一次工具调用；未知工具、参数错误、执行失败、超时均为 ToolInvocation
    pub async fn execute(&self, call: &ToolCall) -> Result<String, AgentError> {
        let start = Instant::now();
        let request = self
            .registry
            .parse(call)
            .map_err(|reason| AgentError::tool(&call.tool, reason));

        let result = match request {
            Ok(request) => match timeout(self.timeout, self.registry.execute(request)).await {
                Ok(Ok(content)) => Ok(content),
                Ok(Err(e)) => Err(AgentError::tool(&call.tool, e)),
                Err(_) => Err(AgentError::tool(
                    &call.tool,
                    format!("timed out after {:?}", self.timeout),
                )),
            },
            Err(e) => Err(e),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.tool,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.args),
        });
        tracing::info!(audit = %audit, "tool");

        result
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
