//! Code Chat - chat front end for a code-executing agent
//!
//! - Streams agent output into a markdown transcript, with code, console
//!   output and images rendered as they arrive
//! - Speaks the agent's messages sentence by sentence while they stream
//! - Multi-step reasoning chains with self-reflection
//! - Image generation through a Nova-Canvas-style model
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use code_chat::agent::HttpInterpreter;
//! use code_chat::chat::StreamOrchestrator;
//! use code_chat::memory::SqliteChatStore;
//! use code_chat::session::{SessionContext, SessionSettings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = code_chat::Config::load()?;
//!     let store = Arc::new(SqliteChatStore::new(config.storage.database_path()?).await?);
//!     let orchestrator = StreamOrchestrator::new(Arc::new(HttpInterpreter::from_config(&config)), store.clone());
//!     let settings = SessionSettings::from_config(&config);
//!     let mut session = SessionContext::start(store.as_ref(), "local", settings, "Plot y = x^2").await?;
//!     let cancel = tokio_util::sync::CancellationToken::new();
//!     let outcome = orchestrator.run_turn(&mut session, "Plot y = x^2", &cancel, |_| {}).await?;
//!     println!("{}", outcome.transcript);
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod memory;
pub mod agent;
pub mod config;
pub mod security;
pub mod session;
pub mod voice;
pub mod chat;
pub mod reasoning;
pub mod canvas;
pub mod cli;

pub use config::Config;
pub use session::{SessionContext, SessionSettings};
pub use chat::{StreamOrchestrator, TurnOutcome, TurnStatus};
pub use reasoning::ReasoningChain;

pub use security::{
    set_api_key,
    get_api_key,
    delete_api_key,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Chat front end for a code-executing agent", NAME, VERSION)
}

/// Longest prefix of `s` that is at most `max` bytes and ends on a char boundary
pub fn truncate_safe(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_safe_respects_char_boundaries() {
        assert_eq!(truncate_safe("hello", 10), "hello");
        assert_eq!(truncate_safe("hello", 3), "hel");
        assert_eq!(truncate_safe("héllo", 2), "h");
    }
}
