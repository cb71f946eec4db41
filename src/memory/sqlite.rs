//! SQLite 会话存储
//!
//! 会话以 JSON 数组形式保存在 travel_plans.conversation_history 列中，整条覆盖写入；
//! rusqlite 是同步 API，所有访问经 spawn_blocking 移出异步运行时。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::memory::{ConversationStore, Message, PersistenceError, PlanId, StoredConversation};

pub struct SqliteConversationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteConversationStore {
    /// 打开（或创建）数据库文件并建表
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        }
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, PersistenceError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS travel_plans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                destination TEXT NOT NULL,
                content TEXT NOT NULL,
                thread_id TEXT,
                conversation_history TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_travel_plans_thread ON travel_plans(thread_id);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, R>(&self, f: F) -> Result<R, PersistenceError>
    where
        F: FnOnce(&mut Connection) -> Result<R, PersistenceError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| PersistenceError::Backend(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn create_plan(
        &self,
        user_id: i64,
        destination: &str,
        plan_content: &str,
    ) -> Result<PlanId, PersistenceError> {
        let destination = destination.to_string();
        let content = plan_content.to_string();
        self.with_conn(move |conn| {
            let now = chrono::Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO travel_plans (user_id, destination, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![user_id, destination, content, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn load(&self, plan_id: PlanId) -> Result<Option<StoredConversation>, PersistenceError> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, destination, content, thread_id, conversation_history
                     FROM travel_plans WHERE id = ?1",
                    params![plan_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()?;

            let Some((user_id, destination, plan_content, thread_id, history)) = row else {
                return Ok(None);
            };
            let messages: Vec<Message> = serde_json::from_str(&history)?;
            Ok(Some(StoredConversation {
                plan_id,
                user_id,
                destination,
                plan_content,
                thread_id,
                messages,
            }))
        })
        .await
    }

    async fn save(
        &self,
        plan_id: PlanId,
        thread_id: &str,
        messages: &[Message],
    ) -> Result<(), PersistenceError> {
        let payload = serde_json::to_string(messages)?;
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            let now = chrono::Utc::now().to_rfc3339();
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE travel_plans
                 SET conversation_history = ?1, thread_id = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![payload, thread_id, now, plan_id],
            )?;
            if updated == 0 {
                return Err(PersistenceError::MissingPlan(plan_id));
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn plan_for_thread(&self, thread_id: &str) -> Result<Option<PlanId>, PersistenceError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id FROM travel_plans WHERE thread_id = ?1",
                    params![thread_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?)
        })
        .await
    }

    async fn delete(&self, plan_id: PlanId) -> Result<bool, PersistenceError> {
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM travel_plans WHERE id = ?1", params![plan_id])?;
            Ok(removed > 0)
        })
        .await
    }
}
