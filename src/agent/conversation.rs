//! Conversation recall for agent prompts
//!
//! The agent is stateless between turns, so each prompt carries a transcript
//! of the most recent exchanges.

use crate::types::Message;

/// Render the last `pairs` user/assistant exchanges as `Role: content` lines
pub fn recall_transcript(messages: &[Message], pairs: usize) -> String {
    let look_back = pairs.saturating_mul(2);
    let start = messages.len().saturating_sub(look_back);
    messages[start..]
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
        .replace("User:", "\nUser:")
}

/// Prompt sent to the agent: the request followed by recent history
pub fn prompt_with_memory(prompt: &str, messages: &[Message], pairs: usize) -> String {
    let memory = recall_transcript(messages, pairs);
    format!(
        "user's request:{}. --- \nBelow is the transcript of your past conversation with the user: {} ---\n",
        prompt, memory
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<Message> {
        vec![
            Message::user("first"),
            Message::assistant("one"),
            Message::user("second"),
            Message::assistant("two"),
            Message::user("third"),
        ]
    }

    #[test]
    fn test_recall_takes_last_pairs() {
        let recalled = recall_transcript(&history(), 1);
        assert_eq!(recalled, "Assistant: two\n\nUser: third");
    }

    #[test]
    fn test_recall_with_short_history_takes_everything() {
        let recalled = recall_transcript(&history(), 10);
        assert!(recalled.starts_with("\nUser: first"));
        assert!(recalled.ends_with("User: third"));
    }

    #[test]
    fn test_prompt_with_memory_wraps_request() {
        let prompt = prompt_with_memory("plot it", &history(), 1);
        assert!(prompt.starts_with("user's request:plot it."));
        assert!(prompt.contains("Assistant: two"));
        assert!(prompt.ends_with("---\n"));
    }
}
