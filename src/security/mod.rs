//! Credential storage
//!
//! One API key is shared by the agent, completion, speech and image
//! endpoints. It comes from `CODE_CHAT_API_KEY`, the OS keyring, or a
//! private file next to the config.

pub mod keyring;

use anyhow::Result;

pub use keyring::API_KEY_ENV;

/// Set API key in secure keyring
pub fn set_api_key(key: &str) -> Result<()> {
    keyring::set_api_key(key)
}

/// Get API key
pub fn get_api_key() -> Result<String> {
    keyring::get_api_key()
}

/// Delete API key from keyring
pub fn delete_api_key() -> Result<()> {
    keyring::delete_api_key()
}

pub fn has_api_key() -> bool {
    keyring::has_api_key()
}
