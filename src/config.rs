//! Configuration management
//!
//! Endpoints, models and defaults for the interpreter, the reasoning chain,
//! voice and image generation, stored as TOML in the platform config dir.

use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Code-executing agent
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    /// OpenAI-compatible completion endpoint
    #[serde(default)]
    pub llm: LlmConfig,
    /// Speech output and input
    #[serde(default)]
    pub voice: VoiceConfig,
    /// Reasoning chain
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    /// Chat persistence
    #[serde(default)]
    pub storage: StorageConfig,
    /// Image generation
    #[serde(default)]
    pub canvas: CanvasConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Base URL of the agent's streaming endpoint
    #[serde(default = "default_interpreter_url")]
    pub base_url: String,
    /// Model the agent runs on
    #[serde(default = "default_interpreter_model")]
    pub model: String,
    #[serde(default = "default_interpreter_temperature")]
    pub temperature: f32,
    #[serde(default = "default_interpreter_max_tokens")]
    pub max_tokens: u32,
    /// Run generated code without asking
    #[serde(default)]
    pub auto_run: bool,
    /// Prior exchanges replayed into each prompt
    #[serde(default = "default_recall_pairs")]
    pub recall_pairs: usize,
    #[serde(default)]
    pub custom_instructions: String,
}

fn default_interpreter_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_interpreter_model() -> String {
    "gpt-4o".to_string()
}

fn default_interpreter_temperature() -> f32 {
    0.1
}

fn default_interpreter_max_tokens() -> u32 {
    1024
}

fn default_recall_pairs() -> usize {
    10
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            base_url: default_interpreter_url(),
            model: default_interpreter_model(),
            temperature: default_interpreter_temperature(),
            max_tokens: default_interpreter_max_tokens(),
            auto_run: false,
            recall_pairs: default_recall_pairs(),
            custom_instructions: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub base_url: String,
}

fn default_llm_url() -> String {
    crate::agent::llm::OPENROUTER_BASE_URL.to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self { base_url: default_llm_url() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Speak replies
    #[serde(default)]
    pub enabled: bool,
    /// BCP-47 language tag
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_speech_url")]
    pub tts_base_url: String,
    #[serde(default = "default_speech_url")]
    pub stt_base_url: String,
    #[serde(default = "default_stt_model")]
    pub stt_model: String,
    /// Used to estimate MP3 clip length
    #[serde(default = "default_mp3_bitrate")]
    pub mp3_bitrate_kbps: u32,
    /// Fraction of a clip's length to wait before the next one
    #[serde(default = "default_pacing")]
    pub pacing: f64,
    #[serde(default = "default_tts_attempts")]
    pub tts_max_attempts: u32,
    /// Play through the audio device instead of only pacing
    #[serde(default = "default_true")]
    pub speaker: bool,
    /// Playback volume, 0.0 to 1.0
    #[serde(default = "default_volume")]
    pub volume: f32,
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_speech_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_stt_model() -> String {
    crate::voice::stt::DEFAULT_STT_MODEL.to_string()
}

fn default_mp3_bitrate() -> u32 {
    crate::voice::playback::DEFAULT_MP3_BITRATE_KBPS
}

fn default_pacing() -> f64 {
    crate::voice::playback::DEFAULT_PACING
}

fn default_tts_attempts() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_volume() -> f32 {
    1.0
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            language: default_language(),
            tts_base_url: default_speech_url(),
            stt_base_url: default_speech_url(),
            stt_model: default_stt_model(),
            mp3_bitrate_kbps: default_mp3_bitrate(),
            pacing: default_pacing(),
            tts_max_attempts: default_tts_attempts(),
            speaker: true,
            volume: default_volume(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default = "default_reasoning_model")]
    pub model: String,
    /// Steps before the final answer is forced
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_step_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_final_tokens")]
    pub final_max_tokens: u32,
    #[serde(default = "default_reasoning_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Attempts per step before a degraded step is used
    #[serde(default = "default_step_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_reasoning_model() -> String {
    "meta-llama/llama-3.1-70b-instruct".to_string()
}

fn default_max_steps() -> u32 {
    4
}

fn default_step_tokens() -> u32 {
    900
}

fn default_final_tokens() -> u32 {
    750
}

fn default_reasoning_temperature() -> f32 {
    0.2
}

fn default_top_p() -> f32 {
    0.99
}

fn default_step_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            model: default_reasoning_model(),
            max_steps: default_max_steps(),
            max_tokens: default_step_tokens(),
            final_max_tokens: default_final_tokens(),
            temperature: default_reasoning_temperature(),
            top_p: default_top_p(),
            max_attempts: default_step_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file; defaults to `chats.db` in the data dir
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Owner of new conversations
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

fn default_user_id() -> String {
    "local".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { database_path: None, user_id: default_user_id() }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("chats.db")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasConfig {
    #[serde(default = "default_canvas_url")]
    pub base_url: String,
    #[serde(default = "default_canvas_model")]
    pub model_id: String,
    /// Where generation directories are created
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
    #[serde(default = "default_cfg_scale")]
    pub cfg_scale: f32,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default = "default_image_count")]
    pub number_of_images: u32,
    #[serde(default = "default_side")]
    pub width: u32,
    #[serde(default = "default_side")]
    pub height: u32,
    /// Fixed seed; random when unset
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_canvas_url() -> String {
    "https://bedrock-runtime.us-east-1.amazonaws.com".to_string()
}

fn default_canvas_model() -> String {
    crate::canvas::generator::DEFAULT_MODEL_ID.to_string()
}

fn default_workspace() -> PathBuf {
    PathBuf::from("workspace")
}

fn default_cfg_scale() -> f32 {
    6.5
}

fn default_quality() -> String {
    "standard".to_string()
}

fn default_image_count() -> u32 {
    1
}

fn default_side() -> u32 {
    1024
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            base_url: default_canvas_url(),
            model_id: default_canvas_model(),
            workspace: default_workspace(),
            cfg_scale: default_cfg_scale(),
            quality: default_quality(),
            number_of_images: default_image_count(),
            width: default_side(),
            height: default_side(),
            seed: None,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            Self::from_toml(&contents)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config file")
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent()
            .context("Config path has no parent")?;

        std::fs::create_dir_all(parent)
            .context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "code-chat", "code-chat")
        .context("Failed to get project directories")
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Show current configuration
pub fn show_config() -> Result<()> {
    let config = Config::load()?;

    println!("Configuration ({})", config_path()?.display());
    println!();
    println!("Interpreter: {} ({})", config.interpreter.base_url, config.interpreter.model);
    println!("  Auto-run:        {}", if config.interpreter.auto_run { "on" } else { "off" });
    println!("  Recall pairs:    {}", config.interpreter.recall_pairs);
    println!("Reasoning:   {} ({})", config.llm.base_url, config.reasoning.model);
    println!("  Max steps:       {}", config.reasoning.max_steps);
    println!("Voice:       {}", if config.voice.enabled { "enabled" } else { "disabled" });
    println!("  Language:        {}", config.voice.language);
    println!("  Speech output:   {}", config.voice.tts_base_url);
    println!("  Transcription:   {} ({})", config.voice.stt_base_url, config.voice.stt_model);
    println!("Canvas:      {} ({})", config.canvas.base_url, config.canvas.model_id);
    println!("  Workspace:       {}", config.canvas.workspace.display());
    println!("Database:    {}", config.storage.database_path()?.display());
    println!("API key:     {}", if crate::security::has_api_key() { "configured" } else { "not configured" });

    Ok(())
}

/// Set API key
pub fn set_api_key(key: &str) -> Result<()> {
    crate::security::set_api_key(key)?;
    println!("API key stored securely.");
    Ok(())
}

/// Reset configuration to defaults
pub fn reset_config() -> Result<()> {
    let config = Config::default();
    config.save()?;
    println!("Configuration reset to defaults.");
    Ok(())
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.interpreter.recall_pairs, 10);
        assert_eq!(config.reasoning.max_steps, 4);
        assert_eq!(config.voice.language, "en-US");
        assert_eq!(config.canvas.model_id, "amazon.nova-canvas-v1:0");
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::from_toml("[voice]\nenabled = true\n\n[reasoning]\nmax_steps = 8\n").unwrap();
        assert!(config.voice.enabled);
        assert_eq!(config.voice.tts_max_attempts, 1);
        assert_eq!(config.reasoning.max_steps, 8);
        assert_eq!(config.reasoning.final_max_tokens, 750);
    }

    #[test]
    fn test_default_toml_round_trips() {
        let config = Config::from_toml(&default_config_toml()).unwrap();
        assert_eq!(config.interpreter.base_url, default_interpreter_url());
        assert_eq!(config.storage.user_id, "local");
    }
}
