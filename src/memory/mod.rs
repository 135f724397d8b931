//! Persistent chat history for code-chat
//!
//! Provides:
//! - Conversations owned by a user
//! - The displayed chat log of each conversation
//! - The raw agent-facing message history, so a conversation can be resumed

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::llm::ChatMessage;
use crate::types::Role;

pub use sqlite::SqliteChatStore;

/// A stored conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Unique conversation ID
    pub id: String,
    /// Owner of the conversation
    pub user_id: String,
    /// Conversation title (derived from the first prompt)
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ConversationRecord {
    /// New conversation with a fresh id
    pub fn new(user_id: impl Into<String>, title: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            title,
            created_at: Utc::now(),
        }
    }
}

/// One displayed chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Title for a conversation started by `prompt`
pub fn title_from_prompt(prompt: &str) -> String {
    let first_line = prompt.lines().next().unwrap_or_default().trim();
    let title = crate::truncate_safe(first_line, 60);
    if title.len() < first_line.len() {
        format!("{}...", title)
    } else {
        title.to_string()
    }
}

/// Persistence capability for chats
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Create or update a conversation
    async fn save_conversation(&self, conversation: &ConversationRecord) -> Result<()>;

    /// Load one conversation
    async fn get_conversation(&self, id: &str) -> Result<Option<ConversationRecord>>;

    /// Conversations of a user, newest first
    async fn list_conversations(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationRecord>>;

    /// Append one displayed message
    async fn save_chat(&self, conversation_id: &str, role: Role, content: &str) -> Result<()>;

    /// Displayed messages of a conversation, oldest first
    async fn get_chats_by_conversation_id(&self, conversation_id: &str) -> Result<Vec<ChatRecord>>;

    /// Replace the stored agent-facing history of a conversation
    async fn save_agent_history(&self, conversation_id: &str, history: &[ChatMessage]) -> Result<()>;

    /// Stored agent-facing history, empty when none was saved
    async fn load_agent_history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_from_prompt() {
        assert_eq!(title_from_prompt("Plot sales\nby month"), "Plot sales");
        let long = "x".repeat(80);
        assert_eq!(title_from_prompt(&long), format!("{}...", "x".repeat(60)));
    }

    #[test]
    fn test_new_conversation_has_unique_id() {
        let a = ConversationRecord::new("u", None);
        let b = ConversationRecord::new("u", None);
        assert_ne!(a.id, b.id);
    }
}
