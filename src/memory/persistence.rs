//! 对话持久化
//!
//! ConversationStore 是编排器与外部计划存储之间的契约：计划拥有会话线程，
//! 保存总是整条日志一次写入，删除计划时级联删除会话。

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::memory::{Message, PlanId};

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("plan {0} does not exist")]
    MissingPlan(PlanId),

    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt conversation payload: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// 存储侧看到的计划与其会话
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredConversation {
    pub plan_id: PlanId,
    pub user_id: i64,
    pub destination: String,
    /// 计划原文（首条 assistant 消息的来源）
    pub plan_content: String,
    pub thread_id: Option<String>,
    pub messages: Vec<Message>,
}

/// 持久化适配器
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// 登记一个新计划（计划本身由外部 CRUD 生成，这里只保留会话所需字段）
    async fn create_plan(
        &self,
        user_id: i64,
        destination: &str,
        plan_content: &str,
    ) -> Result<PlanId, PersistenceError>;

    /// 计划不存在时返回 None
    async fn load(&self, plan_id: PlanId) -> Result<Option<StoredConversation>, PersistenceError>;

    /// 原子地覆盖整条会话并记录线程 ID
    async fn save(
        &self,
        plan_id: PlanId,
        thread_id: &str,
        messages: &[Message],
    ) -> Result<(), PersistenceError>;

    async fn plan_for_thread(&self, thread_id: &str) -> Result<Option<PlanId>, PersistenceError>;

    /// 删除计划及其会话；计划不存在时返回 false
    async fn delete(&self, plan_id: PlanId) -> Result<bool, PersistenceError>;
}

/// 内存实现：测试与离线运行使用，可注入保存失败
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    plans: RwLock<HashMap<PlanId, StoredConversation>>,
    next_id: AtomicI64,
    failing_saves: AtomicUsize,
    saves: AtomicUsize,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 接下来的 n 次 save 返回 Backend 错误
    pub fn fail_next_saves(&self, n: usize) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    /// 成功保存的次数
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create_plan(
        &self,
        user_id: i64,
        destination: &str,
        plan_content: &str,
    ) -> Result<PlanId, PersistenceError> {
        let plan_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.plans.write().await.insert(
            plan_id,
            StoredConversation {
                plan_id,
                user_id,
                destination: destination.to_string(),
                plan_content: plan_content.to_string(),
                thread_id: None,
                messages: Vec::new(),
            },
        );
        Ok(plan_id)
    }

    async fn load(&self, plan_id: PlanId) -> Result<Option<StoredConversation>, PersistenceError> {
        Ok(self.plans.read().await.get(&plan_id).cloned())
    }

    async fn save(
        &self,
        plan_id: PlanId,
        thread_id: &str,
        messages: &[Message],
    ) -> Result<(), PersistenceError> {
        let pending_failures = self.failing_saves.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.failing_saves.store(pending_failures - 1, Ordering::SeqCst);
            return Err(PersistenceError::Backend("injected save failure".into()));
        }

        let mut plans = self.plans.write().await;
        let plan = plans
            .get_mut(&plan_id)
            .ok_or(PersistenceError::MissingPlan(plan_id))?;
        plan.thread_id = Some(thread_id.to_string());
        plan.messages = messages.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn plan_for_thread(&self, thread_id: &str) -> Result<Option<PlanId>, PersistenceError> {
        Ok(self
            .plans
            .read()
            .await
            .values()
            .find(|p| p.thread_id.as_deref() == Some(thread_id))
            .map(|p| p.plan_id))
    }

    async fn delete(&self, plan_id: PlanId) -> Result<bool, PersistenceError> {
        Ok(self.plans.write().await.remove(&plan_id).is_some())
    }
}
