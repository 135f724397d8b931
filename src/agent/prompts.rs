//! System messages and custom instructions for the code-execution agent

/// Execution mode of the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Code runs without asking
    AutoRun,
    /// Code is shown first and runs only after the user confirms
    Confirm,
}

impl ExecutionMode {
    pub fn auto_run(&self) -> bool {
        matches!(self, ExecutionMode::AutoRun)
    }
}

const SHARED_RULES: &str = "\
Write messages to the user in Markdown. Write code on multiple lines with proper indentation.
Any file you create must be created inside the './workspace' folder, even when the user asks for another location.
When the user refers to a filename, look for it in './workspace' first.
Prefer widely available packages (ffmpeg, pandoc, ...). Install everything you need in one command at the beginning.
Make plans with as few steps as possible, but execute them in small, informed steps: run something, print what happened, continue.
Never pretend or simulate execution.
You cannot run code that opens a UI, so review such files instead of running them.";

/// System message for the given mode and conversation language
pub fn system_message(mode: ExecutionMode, language: &str) -> String {
    match mode {
        ExecutionMode::AutoRun => format!(
            "You are a world-class programmer that can complete any goal by executing code.\n\
             First write a plan and recap it between every code block.\n\
             Never ask for permission to run code, just run it. You have almost complete permission to execute what the task needs.\n\
             {}\n\
             Always talk to the user in {} language.",
            SHARED_RULES, language
        ),
        ExecutionMode::Confirm => format!(
            "You are a world-class programmer that can complete any goal.\n\
             Always ask the user for permission before running code. Show prepared code first and wait for confirmation.\n\
             Install new packages only after confirmation.\n\
             {}\n\
             Always talk to the user in {} language.",
            SHARED_RULES, language
        ),
    }
}

/// Per-turn custom instructions appended by the front end
pub fn custom_instructions(mode: ExecutionMode, language: &str, user_instructions: &str) -> String {
    let permission = match mode {
        ExecutionMode::AutoRun => "Never ask the user for confirmation before running code, you can run it!",
        ExecutionMode::Confirm => "First write code, do not run it and only show it to the user. Always ask the user for permission to run any code!",
    };
    let base = format!(
        "You have a female voice. {} Talk to the user in {} language.",
        permission, language
    );
    let extra = user_instructions.trim();
    if extra.is_empty() {
        base
    } else {
        format!("{} {}", base, extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_message_mentions_language_and_mode() {
        let run = system_message(ExecutionMode::AutoRun, "cs-CZ");
        assert!(run.contains("cs-CZ"));
        assert!(run.contains("Never ask for permission"));

        let confirm = system_message(ExecutionMode::Confirm, "en-US");
        assert!(confirm.contains("permission before running code"));
    }

    #[test]
    fn test_custom_instructions_appends_user_text() {
        let text = custom_instructions(ExecutionMode::Confirm, "de-DE", "  Be brief.  ");
        assert!(text.ends_with("Be brief."));
        assert!(text.contains("de-DE"));

        let plain = custom_instructions(ExecutionMode::AutoRun, "en-US", "   ");
        assert!(plain.ends_with("language."));
    }
}
