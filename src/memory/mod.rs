//! 记忆层：会话日志模型与持久化适配器（内存 / SQLite）

pub mod conversation;
pub mod persistence;
pub mod sqlite;

pub use conversation::{thread_id_for, ConversationThread, Message, PlanId, Role};
pub use persistence::{
    ConversationStore, InMemoryConversationStore, PersistenceError, StoredConversation,
};
pub use sqlite::SqliteConversationStore;
