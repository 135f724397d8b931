//! SQLite-based persistent storage for conversations and chat logs

use anyhow::{Result, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ChatRecord, ChatStore, ConversationRecord};
use crate::agent::llm::ChatMessage;
use crate::types::Role;

/// SQLite-based chat store
#[derive(Clone)]
pub struct SqliteChatStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteChatStore {
    /// Open (or create) the store at the given path
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open chat database {}", path.display()))?;

        // Enable WAL mode for better performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::init_schema(&conn)?;
        debug!("Chat store opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Store that lives only as long as the process
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Raw agent-facing history, one JSON document per conversation
            CREATE TABLE IF NOT EXISTS agent_history (
                conversation_id TEXT PRIMARY KEY,
                messages TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_chats_conversation ON chats(conversation_id, id);
        "#)?;

        Ok(())
    }

    /// Number of stored conversations
    pub async fn conversation_count(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRecord> {
    let created_at: String = row.get(3)?;
    Ok(ConversationRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: parse_timestamp(&created_at),
    })
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn save_conversation(&self, conversation: &ConversationRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO conversations (id, user_id, title, created_at)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(id) DO UPDATE SET title = excluded.title"#,
            params![
                conversation.id,
                conversation.user_id,
                conversation.title,
                conversation.created_at.to_rfc3339(),
            ]
        )?;
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let conn = self.conn.lock().await;
        let record = conn.query_row(
            "SELECT id, user_id, title, created_at FROM conversations WHERE id = ?1",
            params![id],
            conversation_from_row,
        ).optional()?;
        Ok(record)
    }

    async fn list_conversations(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT id, user_id, title, created_at FROM conversations
               WHERE user_id = ?1
               ORDER BY created_at DESC
               LIMIT ?2"#
        )?;
        let records = stmt.query_map(params![user_id, limit as i64], conversation_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    async fn save_chat(&self, conversation_id: &str, role: Role, content: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO chats (conversation_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![conversation_id, role.as_str(), content, Utc::now().to_rfc3339()]
        )?;
        Ok(())
    }

    async fn get_chats_by_conversation_id(&self, conversation_id: &str) -> Result<Vec<ChatRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT conversation_id, role, content, created_at FROM chats
               WHERE conversation_id = ?1
               ORDER BY id ASC"#
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (conversation_id, role, content, created_at) = row?;
            let role = Role::parse(&role)
                .with_context(|| format!("Unknown role {:?} in chat log", role))?;
            records.push(ChatRecord {
                conversation_id,
                role,
                content,
                created_at: parse_timestamp(&created_at),
            });
        }
        Ok(records)
    }

    async fn save_agent_history(&self, conversation_id: &str, history: &[ChatMessage]) -> Result<()> {
        let messages_json = serde_json::to_string(history)?;
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT OR REPLACE INTO agent_history (conversation_id, messages, updated_at)
               VALUES (?1, ?2, ?3)"#,
            params![conversation_id, messages_json, Utc::now().to_rfc3339()]
        )?;
        Ok(())
    }

    async fn load_agent_history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.lock().await;
        let raw: Option<String> = conn.query_row(
            "SELECT messages FROM agent_history WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        ).optional()?;

        match raw {
            Some(json) => serde_json::from_str(&json).context("Stored agent history is corrupt"),
            None => Ok(Vec::new()),
        }
    }
}
