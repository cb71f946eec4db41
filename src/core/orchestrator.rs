//! 对话编排器：对外的窄接口
//!
//! 负责：装配 Planner / ToolExecutor / Agent Graph / RetryingInvoker / ThreadStateStore，
//! 并为每轮追问执行 acquire → 追加用户消息 → 重试调用 → 追加助手消息 → release(persist)。
//! 单轮总时限与服务级取消都通过丢弃本轮 future 实现，线程锁随句柄一起释放。

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::AppConfig;
use crate::core::{
    AgentError, PlanRequest, RetryingInvoker, SessionSupervisor, ThreadStateStore, TurnError,
};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{thread_id_for, ConversationStore, Message, PlanId};
use crate::react::{AgentGraph, Planner};
use crate::tools::{ToolExecutor, ToolKind, ToolRegistry};

/// 编排器配置（由 AppConfig 转换，或在测试中直接构造）
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub max_retries: u32,
    pub turn_timeout: Duration,
    pub lock_wait: Duration,
    pub max_steps: usize,
    pub tool_timeout: Duration,
    /// 模型标识，仅用于日志
    pub model: String,
    /// None 表示后端齐备的工具全部启用
    pub enabled_tools: Option<Vec<ToolKind>>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            turn_timeout: Duration::from_secs(120),
            lock_wait: Duration::from_secs(30),
            max_steps: 12,
            tool_timeout: Duration::from_secs(30),
            model: "llama-3.1-8b-instant".to_string(),
            enabled_tools: None,
        }
    }
}

/// 根据配置选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    match (provider.as_str(), cfg.llm.api_key()) {
        ("mock", _) => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
        (_, Some(key)) => {
            let endpoint = cfg.llm.endpoint();
            tracing::info!(provider = %provider, model = %cfg.llm.model, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(endpoint.as_deref(), &cfg.llm.model, &key))
        }
        (_, None) => {
            tracing::warn!(provider = %provider, "No API key set, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}

/// 首次规划的结果
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedPlan {
    pub plan_id: PlanId,
    pub thread_id: String,
    pub content: String,
}

pub struct ConversationOrchestrator {
    threads: ThreadStateStore,
    invoker: RetryingInvoker,
    supervisor: SessionSupervisor,
    config: OrchestratorConfig,
}

impl ConversationOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        llm: Arc<dyn LlmClient>,
        tools: ToolRegistry,
        persistence: Arc<dyn ConversationStore>,
    ) -> Self {
        let tools = match &config.enabled_tools {
            Some(kinds) => tools.with_allowed(kinds.iter().copied()),
            None => tools,
        };
        tracing::info!(
            model = %config.model,
            tools = ?tools.tool_names(),
            max_retries = config.max_retries,
            "conversation orchestrator ready"
        );

        let planner = Planner::new(llm, tools.to_schema_json());
        let executor = ToolExecutor::new(tools, config.tool_timeout);
        let graph = Arc::new(AgentGraph::new(planner, executor, config.max_steps));

        Self {
            threads: ThreadStateStore::new(persistence, config.lock_wait),
            invoker: RetryingInvoker::new(graph, config.max_retries),
            supervisor: SessionSupervisor::new(),
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn threads(&self) -> &ThreadStateStore {
        &self.threads
    }

    /// 登记新计划（外部计划存储的直通，便于装配与测试）
    pub async fn create_plan(
        &self,
        user_id: i64,
        destination: &str,
        plan_content: &str,
    ) -> Result<PlanId, AgentError> {
        Ok(self
            .threads
            .persistence()
            .create_plan(user_id, destination, plan_content)
            .await?)
    }

    /// 计划创建后调用一次：合成线程 ID 并以 seed_message 作为首条 assistant 消息持久化。
    /// 计划已有线程时直接返回已有 ID（包括在等锁期间被懒加载的追问抢先创建的线程）。
    pub async fn start_thread(&self, plan_id: PlanId, seed_message: &str) -> Result<String, AgentError> {
        let stored = self
            .threads
            .persistence()
            .load(plan_id)
            .await?
            .ok_or(AgentError::PlanNotFound(plan_id))?;
        if let Some(existing) = stored.thread_id {
            return Ok(existing);
        }

        let candidate = thread_id_for(stored.user_id, plan_id, Some(chrono::Utc::now().timestamp()));
        let handle = self
            .threads
            .acquire_or_start(plan_id, &candidate, seed_message)
            .await?;
        let thread_id = handle.thread_id().to_string();
        self.threads.release(handle, true).await?;
        tracing::info!(thread_id = %thread_id, plan_id, "thread started");
        Ok(thread_id)
    }

    /// 首次规划：以请求拼出的提问跑一次 Agent（初始提示词），
    /// 成功后登记计划并以生成的计划作为种子开启线程。
    /// 兜底回复不算计划，不会登记。
    pub async fn generate_plan(
        &self,
        user_id: i64,
        request: &PlanRequest,
    ) -> Result<GeneratedPlan, AgentError> {
        let started = Instant::now();
        let cancel = self.supervisor.child_token();
        let query = request.query();
        let context = [Message::user(query.as_str())];

        let deadline = self.config.turn_timeout;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            finished = tokio::time::timeout(deadline, self.invoker.invoke(&context, &request.destination)) => {
                match finished {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(AgentError::TurnTimeout {
                            thread_id: format!("user_{}_new_plan", user_id),
                            deadline,
                        })
                    }
                }
            }
        };
        if outcome.fell_back {
            tracing::warn!(user_id, destination = %request.destination, "plan generation fell back");
            return Err(AgentError::PlanGenerationFailed {
                destination: request.destination.clone(),
            });
        }

        let content = outcome.final_message.content;
        let plan_id = self.create_plan(user_id, &request.destination, &content).await?;
        let thread_id = self.start_thread(plan_id, &content).await?;
        tracing::info!(
            user_id,
            plan_id,
            thread_id = %thread_id,
            attempts = outcome.attempts_used,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "plan generated"
        );
        Ok(GeneratedPlan {
            plan_id,
            thread_id,
            content,
        })
    }

    /// 计划对应的线程 ID；尚未创建时懒合成（不含时间戳）
    pub async fn thread_id_for(&self, plan_id: PlanId) -> Result<String, AgentError> {
        let stored = self
            .threads
            .persistence()
            .load(plan_id)
            .await?
            .ok_or(AgentError::PlanNotFound(plan_id))?;
        Ok(stored
            .thread_id
            .unwrap_or_else(|| thread_id_for(stored.user_id, plan_id, None)))
    }

    /// 一轮追问：总是返回恰好一条助手回复，或一个带上下文的结构化错误
    pub async fn continue_thread(
        &self,
        thread_id: &str,
        plan_id: PlanId,
        user_message: &str,
    ) -> Result<String, TurnError> {
        let mut destination = None;
        self.run_turn(thread_id, plan_id, user_message, &mut destination)
            .await
            .map_err(|source| {
                tracing::error!(thread_id, plan_id, error = %source, "turn failed");
                TurnError::new(thread_id, destination, source)
            })
    }

    async fn run_turn(
        &self,
        thread_id: &str,
        plan_id: PlanId,
        user_message: &str,
        destination: &mut Option<String>,
    ) -> Result<String, AgentError> {
        let started = Instant::now();
        let cancel = self.supervisor.child_token();

        let mut handle = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            acquired = self.threads.acquire(thread_id, plan_id) => acquired?,
        };
        *destination = Some(handle.destination().to_string());
        handle.append(Message::user(user_message));

        let turn = async move {
            let context = handle.messages();
            let outcome = self.invoker.invoke(&context, handle.destination()).await?;
            let reply = outcome.final_message.content.clone();
            handle.append(outcome.final_message);
            self.threads.release(handle, true).await?;
            Ok::<_, AgentError>((reply, outcome.attempts_used, outcome.fell_back))
        };

        let deadline = self.config.turn_timeout;
        let (reply, attempts, fell_back) = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            finished = tokio::time::timeout(deadline, turn) => match finished {
                Ok(result) => result?,
                Err(_) => {
                    return Err(AgentError::TurnTimeout {
                        thread_id: thread_id.to_string(),
                        deadline,
                    })
                }
            },
        };

        tracing::info!(
            thread_id,
            plan_id,
            attempts,
            fell_back,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "turn completed"
        );
        Ok(reply)
    }

    /// 线程的完整历史（只读，取共享锁或读取持久化快照）
    pub async fn get_history(&self, thread_id: &str) -> Result<Vec<Message>, AgentError> {
        self.threads
            .snapshot(thread_id)
            .await?
            .ok_or_else(|| AgentError::UnknownThread(thread_id.to_string()))
    }

    /// 删除计划及其会话：先等待该计划上的进行中轮次结束，再级联删除并移出内存
    pub async fn delete_plan(&self, plan_id: PlanId) -> Result<bool, AgentError> {
        let handle = match self.threads.acquire_plan(plan_id).await {
            Ok(handle) => handle,
            Err(AgentError::PlanNotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let thread_id = handle.thread_id().to_string();
        let deleted = self.threads.persistence().delete(plan_id).await?;
        self.threads.evict(handle).await;
        tracing::info!(thread_id = %thread_id, plan_id, "plan and conversation deleted");
        Ok(deleted)
    }

    /// 取消所有进行中的轮次
    pub fn shutdown(&self) {
        self.supervisor.cancel();
    }
}
