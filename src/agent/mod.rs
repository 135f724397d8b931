//! Agent-facing capabilities
//!
//! - `interpreter`: the code-execution agent's event stream
//! - `events`: the closed set of events it produces
//! - `llm`: OpenAI-compatible completions with structured output
//! - `retry`: bounded retry with fallback shared by every remote call

pub mod conversation;
pub mod events;
pub mod interpreter;
pub mod llm;
pub mod prompts;
pub mod retry;

pub use events::{ConsoleOutput, ImagePayload, Phase, StreamEvent};
pub use interpreter::{AgentRequest, AgentStream, EventStream, HttpInterpreter, InterpreterInstructions, ReplayAgent};
pub use llm::{ChatMessage, CompletionOptions, ContentPart, LlmClient, ProviderConfig};
pub use prompts::ExecutionMode;
pub use retry::{RetryPolicy, retry, retry_with_fallback};
