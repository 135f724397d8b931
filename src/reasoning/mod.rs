//! Multi-step reasoning with self-reflection
//!
//! - `chain`: the step-by-step controller
//! - `step`: step types and the structured-output capability
//! - `prompts`: fixed prompts that steer the model

pub mod chain;
pub mod prompts;
pub mod step;

pub use chain::{opening_message, ChainSettings, ChainState, ChainUpdate, ReasoningChain};
pub use step::{LlmStepGenerator, NextAction, ReasoningStep, StepError, StepGenerator, StepResponse};
