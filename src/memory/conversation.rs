//! 对话日志：消息与会话线程
//!
//! 线程只追加、不修改；插入顺序即下一次推理的上下文窗口。
//! 持久化的线程只包含 user / assistant 消息，system 与 tool 只出现在推理上下文中。

use serde::{Deserialize, Serialize};

/// 计划 ID（由外部计划存储分配）
pub type PlanId = i64;

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    /// 工具结果，仅在单次 Agent Graph 运行内存在
    Tool,
}

impl Role {
    /// 是否可以进入持久化的会话线程
    pub fn is_conversational(self) -> bool {
        matches!(self, Role::User | Role::Assistant)
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// 工具结果，content 前缀标明工具名，便于模型对齐调用与结果
    pub fn tool(tool_name: &str, content: impl AsRef<str>) -> Self {
        Self {
            role: Role::Tool,
            content: format!("[{}] {}", tool_name, content.as_ref()),
        }
    }
}

/// 会话线程：某个旅行计划的完整对话
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationThread {
    pub thread_id: String,
    pub plan_id: PlanId,
    messages: Vec<Message>,
}

impl ConversationThread {
    pub fn new(thread_id: impl Into<String>, plan_id: PlanId) -> Self {
        Self {
            thread_id: thread_id.into(),
            plan_id,
            messages: Vec::new(),
        }
    }

    /// 从已有历史恢复；历史为空且有计划内容时，以计划原文作为首条 assistant 消息
    pub fn restore(
        thread_id: impl Into<String>,
        plan_id: PlanId,
        history: Vec<Message>,
        plan_content: &str,
    ) -> Self {
        let mut thread = Self::new(thread_id, plan_id);
        if history.is_empty() {
            if !plan_content.is_empty() {
                thread.messages.push(Message::assistant(plan_content));
            }
        } else {
            thread.messages = history
                .into_iter()
                .filter(|m| m.role.is_conversational())
                .collect();
        }
        thread
    }

    pub fn push(&mut self, msg: Message) {
        debug_assert!(msg.role.is_conversational());
        self.messages.push(msg);
    }

    pub fn extend(&mut self, msgs: impl IntoIterator<Item = Message>) {
        for m in msgs {
            self.push(m);
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// 合成线程 ID：创建计划时带时间戳，追问时懒创建则不带
pub fn thread_id_for(user_id: i64, plan_id: PlanId, created_at: Option<i64>) -> String {
    match created_at {
        Some(ts) => format!("user_{}_plan_{}_{}", user_id, plan_id, ts),
        None => format!("user_{}_plan_{}", user_id, plan_id),
    }
}
