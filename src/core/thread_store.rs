//! 线程状态存储：plan_id → 会话日志，同一计划同一时刻只允许一个 Agent 运行
//!
//! 持久化按计划整体覆盖写入，所以锁也按计划划分：指向同一计划的不同 thread_id 共用一把锁，
//! 加载后的日志记录它真正的 thread_id，其余 ID 一律 ThreadMismatch。
//! 每个计划一把独立的读写锁（tokio 的锁按到达顺序排队），不同计划之间互不阻塞；
//! 外层 map 只在查找/插入/移除槽位时短暂加锁，不会在持有它时等待槽位锁。
//! 首次获取时从持久化适配器加载（无历史则用计划原文播种）；成功落盘且无人等待的槽位随即卸载，
//! 获取失败留下的空槽位也会移除，map 只保留正在使用或尚未落盘的计划。
//! 句柄上的 append 先暂存，release 时一次性提交到内存日志并整体保存；
//! 句柄未 release 就被丢弃（超时、取消、panic）时暂存消息作废、锁随之释放，日志中不会出现半轮对话。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::core::AgentError;
use crate::memory::{
    thread_id_for, ConversationStore, ConversationThread, Message, PlanId, StoredConversation,
};

/// 已加载计划的内存状态
#[derive(Debug)]
struct ThreadSlot {
    thread: ConversationThread,
    destination: String,
    /// 内存日志领先于持久化副本（上次保存失败或未要求保存）
    dirty: bool,
}

type SlotLock = Arc<RwLock<Option<ThreadSlot>>>;

/// 调用方以什么身份获取计划的锁
#[derive(Debug, Clone, Copy)]
enum Claim<'a> {
    /// 指定线程；与计划已有线程不符时报 ThreadMismatch
    Thread(&'a str),
    /// 为计划开启线程：已有线程则沿用，否则采用 candidate 并以 seed 播种
    Start { candidate: &'a str, seed: &'a str },
    /// 不关心线程 ID（删除计划）
    Any,
}

impl Claim<'_> {
    fn label(&self, plan_id: PlanId) -> String {
        match self {
            Claim::Thread(id) => id.to_string(),
            Claim::Start { candidate, .. } => candidate.to_string(),
            Claim::Any => format!("plan_{}", plan_id),
        }
    }
}

/// 持有某计划写锁的句柄
#[derive(Debug)]
pub struct ThreadHandle {
    guard: OwnedRwLockWriteGuard<Option<ThreadSlot>>,
    staged: Vec<Message>,
    thread_id: String,
    plan_id: PlanId,
    destination: String,
}

impl ThreadHandle {
    /// 计划实际使用的线程 ID
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn plan_id(&self) -> PlanId {
        self.plan_id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// 暂存一条消息，release 时提交
    pub fn append(&mut self, message: Message) {
        self.staged.push(message);
    }

    /// 已提交的日志加上本句柄暂存的消息，即下一次推理的上下文
    pub fn messages(&self) -> Vec<Message> {
        let mut all = self
            .guard
            .as_ref()
            .map(|slot| slot.thread.messages().to_vec())
            .unwrap_or_default();
        all.extend(self.staged.iter().cloned());
        all
    }
}

pub struct ThreadStateStore {
    persistence: Arc<dyn ConversationStore>,
    slots: RwLock<HashMap<PlanId, SlotLock>>,
    lock_wait: Duration,
}

impl ThreadStateStore {
    pub fn new(persistence: Arc<dyn ConversationStore>, lock_wait: Duration) -> Self {
        Self {
            persistence,
            slots: RwLock::new(HashMap::new()),
            lock_wait,
        }
    }

    pub fn persistence(&self) -> &Arc<dyn ConversationStore> {
        &self.persistence
    }

    async fn slot(&self, plan_id: PlanId) -> SlotLock {
        if let Some(slot) = self.slots.read().await.get(&plan_id) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(plan_id)
            .or_insert_with(|| Arc::new(RwLock::new(None)))
            .clone()
    }

    /// 等待并获取线程所属计划的写锁；超过 lock_wait 返回 LockTimeout
    pub async fn acquire(&self, thread_id: &str, plan_id: PlanId) -> Result<ThreadHandle, AgentError> {
        self.lock(plan_id, Claim::Thread(thread_id)).await
    }

    /// 为计划开启线程：计划已有线程（已持久化或正被懒创建的追问占用）时沿用它，
    /// 否则采用 candidate 并以 seed 作为首条 assistant 消息。句柄的 thread_id 即最终 ID。
    pub async fn acquire_or_start(
        &self,
        plan_id: PlanId,
        candidate: &str,
        seed: &str,
    ) -> Result<ThreadHandle, AgentError> {
        self.lock(plan_id, Claim::Start { candidate, seed }).await
    }

    /// 获取计划的写锁而不校验线程 ID
    pub async fn acquire_plan(&self, plan_id: PlanId) -> Result<ThreadHandle, AgentError> {
        self.lock(plan_id, Claim::Any).await
    }

    async fn lock(&self, plan_id: PlanId, claim: Claim<'_>) -> Result<ThreadHandle, AgentError> {
        let slot = self.slot(plan_id).await;
        let result = self.lock_slot(&slot, plan_id, claim).await;
        if result.is_err() {
            self.discard_if_unused(plan_id, &slot).await;
        }
        result
    }

    async fn lock_slot(
        &self,
        slot: &SlotLock,
        plan_id: PlanId,
        claim: Claim<'_>,
    ) -> Result<ThreadHandle, AgentError> {
        let mut guard = tokio::time::timeout(self.lock_wait, slot.clone().write_owned())
            .await
            .map_err(|_| AgentError::LockTimeout {
                thread_id: claim.label(plan_id),
                waited: self.lock_wait,
            })?;

        if guard.is_none() {
            let stored = self
                .persistence
                .load(plan_id)
                .await?
                .ok_or(AgentError::PlanNotFound(plan_id))?;
            *guard = Some(restore_slot(stored, claim)?);
            tracing::debug!(plan_id, "thread loaded from persistence");
        }

        let Some(loaded) = guard.as_ref() else {
            return Err(AgentError::PlanNotFound(plan_id));
        };
        if let Claim::Thread(requested) = claim {
            if loaded.thread.thread_id != requested {
                return Err(AgentError::ThreadMismatch {
                    requested: requested.to_string(),
                    expected: loaded.thread.thread_id.clone(),
                    plan_id,
                });
            }
        }

        let thread_id = loaded.thread.thread_id.clone();
        let destination = loaded.destination.clone();
        Ok(ThreadHandle {
            guard,
            staged: Vec::new(),
            thread_id,
            plan_id,
            destination,
        })
    }

    /// 获取失败后移除没有其他人引用、且没有未落盘内容的槽位
    async fn discard_if_unused(&self, plan_id: PlanId, slot: &SlotLock) {
        let mut slots = self.slots.write().await;
        // map 与调用方各持有一份引用
        let unused = slots.get(&plan_id).map_or(false, |current| {
            Arc::ptr_eq(current, slot)
                && Arc::strong_count(current) <= 2
                && current
                    .try_read()
                    .map_or(false, |g| g.as_ref().map_or(true, |s| !s.dirty))
        });
        if unused {
            slots.remove(&plan_id);
        }
    }

    pub fn append(&self, handle: &mut ThreadHandle, message: Message) {
        handle.append(message);
    }

    /// 提交暂存消息；persist 为 true 时把整条日志交给适配器一次写入，然后释放锁。
    /// 保存失败时日志仍保留在内存中，下一次成功保存会一并写入；
    /// 保存成功且没有等待者时卸载槽位，之后按需从持久化重新加载。
    pub async fn release(&self, handle: ThreadHandle, persist: bool) -> Result<(), AgentError> {
        let ThreadHandle {
            mut guard,
            staged,
            thread_id,
            plan_id,
            ..
        } = handle;

        let Some(slot) = guard.as_mut() else {
            return Ok(());
        };
        if !staged.is_empty() {
            slot.thread.extend(staged);
            slot.dirty = true;
        }
        if !persist {
            return Ok(());
        }

        self.persistence
            .save(plan_id, &thread_id, slot.thread.messages())
            .await?;
        slot.dirty = false;

        let mut slots = self.slots.write().await;
        // map 与 guard 各持有一份引用
        let idle = slots
            .get(&plan_id)
            .map_or(false, |current| Arc::strong_count(current) <= 2);
        if idle {
            slots.remove(&plan_id);
        }
        Ok(())
    }

    /// 读取线程历史：计划已加载时取共享读锁，否则读取持久化副本。
    /// thread_id → plan_id 的映射以持久化为准，从未成功保存过的线程视为不存在。
    pub async fn snapshot(&self, thread_id: &str) -> Result<Option<Vec<Message>>, AgentError> {
        let Some(plan_id) = self.persistence.plan_for_thread(thread_id).await? else {
            return Ok(None);
        };

        let loaded = self.slots.read().await.get(&plan_id).cloned();
        if let Some(slot) = loaded {
            let guard = tokio::time::timeout(self.lock_wait, slot.read())
                .await
                .map_err(|_| AgentError::LockTimeout {
                    thread_id: thread_id.to_string(),
                    waited: self.lock_wait,
                })?;
            if let Some(s) = guard.as_ref() {
                if s.thread.thread_id == thread_id {
                    return Ok(Some(s.thread.messages().to_vec()));
                }
            }
        }

        let Some(stored) = self.persistence.load(plan_id).await? else {
            return Ok(None);
        };
        let slot = restore_slot(stored, Claim::Thread(thread_id))?;
        Ok(Some(slot.thread.messages().to_vec()))
    }

    /// 在持有写锁的前提下移除计划（删除计划时调用）；仍有等待者时只清空槽位，等待者会重新加载
    pub async fn evict(&self, mut handle: ThreadHandle) {
        *handle.guard = None;
        let mut slots = self.slots.write().await;
        let idle = slots
            .get(&handle.plan_id)
            .map_or(false, |slot| Arc::strong_count(slot) <= 2);
        if idle {
            slots.remove(&handle.plan_id);
        }
    }

    /// 当前在内存中的计划数
    pub async fn loaded_count(&self) -> usize {
        self.slots.read().await.len()
    }
}

fn restore_slot(stored: StoredConversation, claim: Claim<'_>) -> Result<ThreadSlot, AgentError> {
    let (thread_id, seed) = match (stored.thread_id.as_deref(), claim) {
        (Some(existing), Claim::Thread(requested)) if existing != requested => {
            return Err(AgentError::ThreadMismatch {
                requested: requested.to_string(),
                expected: existing.to_string(),
                plan_id: stored.plan_id,
            });
        }
        (Some(existing), _) => (existing.to_string(), None),
        (None, Claim::Thread(requested)) => (requested.to_string(), None),
        (None, Claim::Start { candidate, seed }) => (candidate.to_string(), Some(seed)),
        (None, Claim::Any) => (thread_id_for(stored.user_id, stored.plan_id, None), None),
    };
    Ok(ThreadSlot {
        thread: ConversationThread::restore(
            thread_id,
            stored.plan_id,
            stored.messages,
            seed.unwrap_or(stored.plan_content.as_str()),
        ),
        destination: stored.destination,
        dirty: false,
    })
}
