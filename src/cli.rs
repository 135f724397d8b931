//! CLI interface for code-chat

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentStream, HttpInterpreter, ReplayAgent, RetryPolicy};
use crate::canvas::{GenerationConfig, GenerationTask, HttpImageModel, ImageGenerator, ImageSize};
use crate::chat::{StreamOrchestrator, TurnError, TurnStatus, VoiceOutput};
use crate::config::Config;
use crate::memory::{ChatStore, SqliteChatStore};
use crate::reasoning::{opening_message, ChainSettings, ChainUpdate, LlmStepGenerator, ReasoningChain};
use crate::session::{SessionContext, SessionSettings};
use crate::voice::{AudioPlayer, HttpSpeechEngine, HttpTranscriber, PacedPlayer, Synthesizer};

#[derive(Parser)]
#[command(name = "code-chat")]
#[command(about = "Chat with a code-executing agent, with spoken replies and reasoning chains", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent; without a prompt, starts an interactive session
    Chat {
        /// Speak the agent's messages
        #[arg(short, long)]
        voice: bool,
        /// Language for speech and replies (BCP-47, e.g. de-DE)
        #[arg(short, long)]
        language: Option<String>,
        /// Run generated code without confirmation
        #[arg(long)]
        auto_run: bool,
        /// Continue a stored conversation
        #[arg(short = 'C', long)]
        conversation: Option<String>,
        /// Transcribe this recording and use it as the prompt
        #[arg(long)]
        audio: Option<PathBuf>,
        /// Replay recorded agent output (JSON lines) instead of calling the agent
        #[arg(long)]
        replay: Option<PathBuf>,
        /// Prompt for a single turn
        prompt: Option<String>,
    },
    /// Answer with a multi-step reasoning chain
    Reason {
        /// Steps before the final answer is forced
        #[arg(long)]
        max_steps: Option<u32>,
        /// Image or text file to include with the prompt
        #[arg(short, long)]
        attach: Vec<PathBuf>,
        prompt: String,
    },
    /// Manage conversation history
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
    /// Generate and edit images
    Canvas {
        #[command(subcommand)]
        command: CanvasCommands,
    },
    /// Configure code-chat
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum HistoryCommands {
    /// List recent conversations
    List {
        /// Maximum conversations to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show a specific conversation
    Show {
        /// Conversation ID
        id: String,
    },
}

#[derive(Subcommand)]
enum CanvasCommands {
    /// Generate an image from text; "NEGATIVE:" starts the negative prompt
    Generate {
        prompt: String,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        /// Named size: square, landscape, hd, fhd
        #[arg(long, conflicts_with_all = ["width", "height"])]
        preset: Option<String>,
        /// Take the size from an existing image
        #[arg(long, conflicts_with_all = ["width", "height", "preset"])]
        like: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Remove the background of an image
    RemoveBackground {
        image: PathBuf,
    },
    /// Repaint the region of an image described by a mask prompt
    Inpaint {
        image: PathBuf,
        /// What to repaint
        #[arg(short, long)]
        mask: String,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// List earlier generations, newest first
    List,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Store the API key
    SetApiKey {
        key: String,
    },
    /// Remove the stored API key
    DeleteApiKey,
    /// Reset configuration to defaults
    Reset,
}

/// Main CLI entry point
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Chat { voice, language, auto_run, conversation, audio, replay, prompt } => {
            let options = ChatOptions { voice, language, auto_run, conversation, audio, replay, prompt };
            run_chat(options).await
        }
        Commands::Reason { max_steps, attach, prompt } => run_reasoning(&prompt, max_steps, &attach).await,
        Commands::History { command } => match command {
            HistoryCommands::List { limit } => list_conversations(limit).await,
            HistoryCommands::Show { id } => show_conversation(&id).await,
        },
        Commands::Canvas { command } => run_canvas(command).await,
        Commands::Config { command } => match command {
            ConfigCommands::Show => crate::config::show_config(),
            ConfigCommands::SetApiKey { key } => crate::config::set_api_key(&key),
            ConfigCommands::DeleteApiKey => {
                crate::security::delete_api_key()?;
                println!("API key removed.");
                Ok(())
            }
            ConfigCommands::Reset => crate::config::reset_config(),
        },
    }
}

// ============ Chat ============

struct ChatOptions {
    voice: bool,
    language: Option<String>,
    auto_run: bool,
    conversation: Option<String>,
    audio: Option<PathBuf>,
    replay: Option<PathBuf>,
    prompt: Option<String>,
}

async fn open_store(config: &Config) -> Result<Arc<SqliteChatStore>> {
    let path = config.storage.database_path()?;
    Ok(Arc::new(SqliteChatStore::new(path).await?))
}

fn voice_output(config: &Config) -> VoiceOutput {
    let engine = Arc::new(HttpSpeechEngine::from_config(config));
    let policy = RetryPolicy::fixed(config.voice.tts_max_attempts, std::time::Duration::from_millis(250));
    let synthesizer = Synthesizer::new(engine).with_policy(policy);
    VoiceOutput { synthesizer, player: audio_player(config) }
}

#[cfg(feature = "voice")]
fn audio_player(config: &Config) -> Arc<dyn AudioPlayer> {
    if config.voice.speaker {
        Arc::new(crate::voice::RodioPlayer::new().with_volume(config.voice.volume))
    } else {
        Arc::new(PacedPlayer::new(config.voice.mp3_bitrate_kbps, config.voice.pacing))
    }
}

#[cfg(not(feature = "voice"))]
fn audio_player(config: &Config) -> Arc<dyn AudioPlayer> {
    Arc::new(PacedPlayer::new(config.voice.mp3_bitrate_kbps, config.voice.pacing))
}

async fn run_chat(options: ChatOptions) -> Result<()> {
    let config = Config::load()?;
    let mut settings = SessionSettings::from_config(&config);
    if options.voice {
        settings.voice_enabled = true;
    }
    if let Some(language) = options.language {
        settings.language = language;
    }
    if options.auto_run {
        settings.mode = crate::agent::ExecutionMode::AutoRun;
    }

    let store = open_store(&config).await?;
    let agent: Arc<dyn AgentStream> = match &options.replay {
        Some(path) => Arc::new(ReplayAgent::from_file(path)?),
        None => Arc::new(HttpInterpreter::from_config(&config)),
    };
    let mut orchestrator = StreamOrchestrator::new(agent, store.clone());
    if settings.voice_enabled {
        orchestrator = orchestrator.with_voice(voice_output(&config));
    }

    let mut session = match &options.conversation {
        Some(id) => {
            let session = SessionContext::resume(store.as_ref(), id, &config.storage.user_id, settings.clone()).await?;
            println!("Resumed conversation {} ({} messages)", id, session.messages.len());
            Some(session)
        }
        None => None,
    };

    let first_prompt = match (&options.audio, options.prompt) {
        (Some(path), _) => {
            let text = HttpTranscriber::from_config(&config)
                .transcribe_file(path, &settings.language)
                .await?;
            if text == crate::voice::stt::NOT_UNDERSTOOD {
                println!("{}", text);
                return Ok(());
            }
            println!("> {}", text);
            Some(text)
        }
        (None, prompt) => prompt,
    };

    if let Some(prompt) = first_prompt {
        let session = ensure_session(&mut session, store.as_ref(), &config, &settings, &prompt).await?;
        return chat_turn(&orchestrator, session, &prompt).await;
    }

    println!("Chatting with the agent. Ctrl-C stops a reply, 'exit' or EOF quits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else { break };
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if matches!(prompt, "exit" | "quit") {
            break;
        }
        let active = ensure_session(&mut session, store.as_ref(), &config, &settings, prompt).await?;
        if let Err(e) = chat_turn(&orchestrator, active, prompt).await {
            eprintln!("\nError: {:#}", e);
        }
    }
    Ok(())
}

async fn ensure_session<'a>(
    session: &'a mut Option<SessionContext>,
    store: &dyn ChatStore,
    config: &Config,
    settings: &SessionSettings,
    first_prompt: &str,
) -> Result<&'a mut SessionContext> {
    if session.is_none() {
        let started = SessionContext::start(store, &config.storage.user_id, settings.clone(), first_prompt).await?;
        *session = Some(started);
    }
    session.as_mut().context("Session was not started")
}

/// One turn, printing the transcript as it grows and cancelling on Ctrl-C
async fn chat_turn(orchestrator: &StreamOrchestrator, session: &mut SessionContext, prompt: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let mut printed = 0usize;
    let result = orchestrator
        .run_turn(session, prompt, &cancel, |text| print_new(text, &mut printed))
        .await;
    watcher.abort();

    match result {
        Ok(outcome) => {
            if outcome.status == TurnStatus::Cancelled {
                println!("\n[stopped]");
            }
            if outcome.skipped_units > 0 {
                eprintln!("({} sentence(s) could not be spoken)", outcome.skipped_units);
            }
            Ok(())
        }
        Err(TurnError::Agent { partial, source }) => {
            print_new(&partial, &mut printed);
            Err(source.context("The agent stopped responding"))
        }
        Err(e) => Err(e.into()),
    }
}

/// Print whatever was appended since the last call
fn print_new(text: &str, printed: &mut usize) {
    if text.len() > *printed && text.is_char_boundary(*printed) {
        print!("{}", &text[*printed..]);
        let _ = std::io::stdout().flush();
        *printed = text.len();
    }
}

// ============ Reasoning ============

async fn run_reasoning(prompt: &str, max_steps: Option<u32>, attachments: &[PathBuf]) -> Result<()> {
    let config = Config::load()?;
    let mut settings = ChainSettings::from_config(&config);
    if let Some(steps) = max_steps {
        settings.max_steps = steps.max(1);
    }

    let generator = Arc::new(LlmStepGenerator::from_config(&config)?);
    let opening = opening_message(prompt, attachments)?;
    let chain = ReasoningChain::new(generator, settings, opening);

    let updates = chain
        .run(|update| {
            let step = update.step();
            println!("\n### {}\n", update.heading());
            println!("{}", step.content);
            println!("\n_{:.2}s, confidence {:.2}_", step.elapsed_time, step.confidence);
        })
        .await;

    if let Some(ChainUpdate::Final { total_thinking_time, .. }) = updates.last() {
        println!("\n**Total thinking time: {:.2} seconds**", total_thinking_time.as_secs_f64());
    }
    Ok(())
}

// ============ History ============

async fn list_conversations(limit: usize) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config).await?;
    let conversations = store.list_conversations(&config.storage.user_id, limit).await?;

    if conversations.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }

    println!("Recent conversations:");
    for record in conversations {
        println!(
            "  {}  {}  {}",
            record.id,
            record.created_at.format("%Y-%m-%d %H:%M"),
            record.title.as_deref().unwrap_or("Untitled")
        );
    }
    Ok(())
}

async fn show_conversation(id: &str) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config).await?;

    let Some(record) = store.get_conversation(id).await? else {
        eprintln!("Conversation not found: {}", id);
        eprintln!("Use 'code-chat history list' to see available conversations.");
        return Ok(());
    };

    let chats = store.get_chats_by_conversation_id(id).await?;
    println!("\n=== Conversation: {} ===", id);
    if let Some(ref title) = record.title {
        println!("Title: {}", title);
    }
    println!("Messages: {}", chats.len());
    println!("Created: {}", record.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!();

    for chat in &chats {
        println!("{}: {}", chat.role, chat.content);
        println!();
    }
    Ok(())
}

// ============ Canvas ============

fn preset_size(name: &str) -> Result<ImageSize> {
    match name.to_lowercase().as_str() {
        "square" => Ok(ImageSize::default()),
        "landscape" => Ok(ImageSize::LANDSCAPE),
        "hd" => Ok(ImageSize::HD),
        "fhd" => Ok(ImageSize::FHD),
        other => bail!("Unknown preset '{}'. Available: square, landscape, hd, fhd", other),
    }
}

fn size_like(path: &Path) -> Result<ImageSize> {
    let (width, height) = image::image_dimensions(path)
        .with_context(|| format!("Failed to read dimensions of {}", path.display()))?;
    Ok(ImageSize::fit(width, height))
}

async fn run_canvas(command: CanvasCommands) -> Result<()> {
    let config = Config::load()?;
    let mut generation_config = GenerationConfig::from_config(&config.canvas);

    let task = match command {
        CanvasCommands::List => {
            for dir in crate::canvas::generator::list_generations(&config.canvas.workspace)? {
                println!("{}", dir.display());
            }
            return Ok(());
        }
        CanvasCommands::Generate { prompt, width, height, preset, like, seed } => {
            let size = match (preset, like) {
                (Some(name), _) => preset_size(&name)?,
                (None, Some(path)) => size_like(&path)?,
                (None, None) => ImageSize::new(
                    width.unwrap_or(config.canvas.width),
                    height.unwrap_or(config.canvas.height),
                ),
            };
            if let Some(seed) = seed {
                generation_config.seed = seed.min(crate::canvas::MAX_SEED);
            }
            GenerationTask::text_image(&prompt, size, generation_config)?
        }
        CanvasCommands::RemoveBackground { image } => {
            GenerationTask::background_removal(crate::canvas::generator::encode_image_file(&image)?)
        }
        CanvasCommands::Inpaint { image, mask, seed } => {
            if let Some(seed) = seed {
                generation_config.seed = seed.min(crate::canvas::MAX_SEED);
            }
            let encoded = crate::canvas::generator::encode_image_file(&image)?;
            GenerationTask::inpainting(encoded, &mask, generation_config)
        }
    };

    let generator = ImageGenerator::new(Arc::new(HttpImageModel::from_config(&config)?), &config.canvas.workspace);
    let generation = generator.generate(&task).await?;
    println!("Saved to {}", generation.output_dir.display());
    for path in &generation.images {
        println!("  {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_chat_flags() {
        let cli = Cli::try_parse_from([
            "code-chat", "chat", "--voice", "--language", "fr-FR", "--auto-run", "plot a sine",
        ]).unwrap();
        match cli.command {
            Commands::Chat { voice, language, auto_run, prompt, .. } => {
                assert!(voice);
                assert!(auto_run);
                assert_eq!(language.as_deref(), Some("fr-FR"));
                assert_eq!(prompt.as_deref(), Some("plot a sine"));
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn test_cli_rejects_preset_with_explicit_size() {
        let result = Cli::try_parse_from([
            "code-chat", "canvas", "generate", "a cat", "--preset", "hd", "--width", "512",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parses_config_commands() {
        let cli = Cli::try_parse_from(["code-chat", "config", "delete-api-key"]).unwrap();
        assert!(matches!(cli.command, Commands::Config { command: ConfigCommands::DeleteApiKey }));
    }

    #[test]
    fn test_preset_sizes() {
        assert_eq!(preset_size("HD").unwrap(), ImageSize::HD);
        assert_eq!(preset_size("fhd").unwrap(), ImageSize::new(1920, 1072));
        assert!(preset_size("poster").is_err());
    }

    #[test]
    fn test_print_new_tracks_offset() {
        let mut printed = 0;
        print_new("abc", &mut printed);
        assert_eq!(printed, 3);
        print_new("abc", &mut printed);
        assert_eq!(printed, 3);
        print_new("abcdef", &mut printed);
        assert_eq!(printed, 6);
    }
}
