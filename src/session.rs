//! Per-conversation session context
//!
//! Everything a turn needs to know about the ongoing conversation travels in
//! one [`SessionContext`], passed by `&mut` to the orchestrator.

use anyhow::Result;
use tracing::info;

use crate::agent::interpreter::InterpreterInstructions;
use crate::agent::llm::ChatMessage;
use crate::agent::prompts::ExecutionMode;
use crate::config::Config;
use crate::memory::{title_from_prompt, ChatStore, ConversationRecord};
use crate::types::Message;

/// User-adjustable settings of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub voice_enabled: bool,
    /// BCP-47 tag used for speech and for the agent's reply language
    pub language: String,
    pub mode: ExecutionMode,
    pub custom_instructions: String,
    /// Exchanges recalled into each prompt
    pub recall_pairs: usize,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            voice_enabled: config.voice.enabled,
            language: config.voice.language.clone(),
            mode: if config.interpreter.auto_run { ExecutionMode::AutoRun } else { ExecutionMode::Confirm },
            custom_instructions: config.interpreter.custom_instructions.clone(),
            recall_pairs: config.interpreter.recall_pairs,
            model: config.interpreter.model.clone(),
            temperature: config.interpreter.temperature,
            max_tokens: config.interpreter.max_tokens,
        }
    }

    /// Agent instructions for the next turn
    pub fn instructions(&self) -> InterpreterInstructions {
        InterpreterInstructions::new(
            self.mode,
            &self.language,
            &self.custom_instructions,
            &self.model,
            self.temperature,
            self.max_tokens,
        )
    }
}

/// State of one conversation
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub conversation_id: String,
    pub user_id: String,
    /// Displayed messages, oldest first
    pub messages: Vec<Message>,
    /// Raw agent-facing history
    pub agent_history: Vec<ChatMessage>,
    pub settings: SessionSettings,
}

impl SessionContext {
    /// Session for a conversation that is not stored yet
    pub fn new(user_id: impl Into<String>, settings: SessionSettings) -> Self {
        Self {
            conversation_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            messages: Vec::new(),
            agent_history: Vec::new(),
            settings,
        }
    }

    /// Create a new stored conversation titled after its first prompt
    pub async fn start(
        store: &dyn ChatStore,
        user_id: &str,
        settings: SessionSettings,
        first_prompt: &str,
    ) -> Result<Self> {
        let record = ConversationRecord::new(user_id, Some(title_from_prompt(first_prompt)));
        store.save_conversation(&record).await?;
        info!("Started conversation {}", record.id);

        let mut session = Self::new(user_id, settings);
        session.conversation_id = record.id;
        Ok(session)
    }

    /// Reload a stored conversation
    pub async fn resume(
        store: &dyn ChatStore,
        conversation_id: &str,
        user_id: &str,
        settings: SessionSettings,
    ) -> Result<Self> {
        let conversation = store.get_conversation(conversation_id).await?
            .ok_or_else(|| anyhow::anyhow!("Conversation {} not found", conversation_id))?;

        let messages = store.get_chats_by_conversation_id(&conversation.id).await?
            .into_iter()
            .map(|chat| Message { role: chat.role, content: chat.content, timestamp: chat.created_at })
            .collect();
        let agent_history = store.load_agent_history(&conversation.id).await?;
        info!("Resumed conversation {}", conversation.id);

        Ok(Self {
            conversation_id: conversation.id,
            user_id: user_id.to_string(),
            messages,
            agent_history,
            settings,
        })
    }
}
