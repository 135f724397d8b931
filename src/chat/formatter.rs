//! Markdown transcript of one assistant turn
//!
//! Every [`StreamEvent`] is folded into a growing markdown string. Folding
//! never fails: unknown formats, undecodable images and unreadable paths are
//! logged and leave the transcript unchanged.
//!
//! Fences opened here are always closed again. An open block is closed before
//! any non-code content is appended, and [`Transcript::finish`] closes a block
//! left dangling by a truncated stream.

use tracing::{debug, warn};

use crate::agent::events::{ConsoleOutput, ImagePayload, Phase, StreamEvent};
use crate::chat::images;

pub const CODE_OPEN: &str = "```python\n";
pub const CODE_CLOSE: &str = "\n```\n";
pub const CONFIRMATION_CLOSE: &str = "```\n";
pub const NO_CONSOLE_OUTPUT: &str = "No output available on console.";
pub const TOKEN_LIMIT_NOTICE: &str = "\n[Token limit reached. Send \"continue\" to proceed.]\n";

/// Which kind of block currently holds an open fence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Code,
    Confirmation,
    Console,
}

impl OpenBlock {
    fn closer(&self) -> &'static str {
        match self {
            OpenBlock::Confirmation => CONFIRMATION_CLOSE,
            OpenBlock::Code | OpenBlock::Console => CODE_CLOSE,
        }
    }
}

/// Incrementally built markdown transcript
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    text: String,
    open: Option<OpenBlock>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Close any dangling fence and return the markdown
    pub fn finish(mut self) -> String {
        self.close_fence();
        self.text
    }

    /// Fold one event, consuming and returning the transcript
    pub fn fold(mut self, event: &StreamEvent) -> Self {
        self.apply(event);
        self
    }

    /// Fold one event in place
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Message { phase, content, token_limit_reached } => {
                self.close_fence();
                match phase {
                    Phase::Start => {}
                    Phase::Middle => self.text.push_str(content),
                    Phase::End => {
                        self.text.push('\n');
                        if *token_limit_reached {
                            self.text.push_str(TOKEN_LIMIT_NOTICE);
                        }
                    }
                }
            }
            StreamEvent::Code { phase, content } => match phase {
                Phase::Start => self.open_fence(OpenBlock::Code),
                Phase::Middle => self.text.push_str(content),
                Phase::End => self.close_block(OpenBlock::Code),
            },
            StreamEvent::Confirmation { phase, code } => match phase {
                Phase::Start => self.open_fence(OpenBlock::Confirmation),
                Phase::Middle => self.text.push_str(code),
                Phase::End => self.close_block(OpenBlock::Confirmation),
            },
            StreamEvent::Console { phase, output } => match phase {
                Phase::Start => self.open_fence(OpenBlock::Console),
                Phase::Middle => match output {
                    ConsoleOutput::Output(text) => self.text.push_str(text),
                    ConsoleOutput::ActiveLine(line) => {
                        if line.as_deref().map_or(true, str::is_empty) {
                            self.text.push_str(NO_CONSOLE_OUTPUT);
                        }
                    }
                    ConsoleOutput::Other(format) => debug!("Ignoring console format {:?}", format),
                },
                Phase::End => self.close_block(OpenBlock::Console),
            },
            StreamEvent::Image { phase, payload } => {
                self.close_fence();
                match phase {
                    Phase::Start | Phase::End => self.text.push('\n'),
                    Phase::Middle => self.append_image(payload),
                }
            }
        }
    }

    fn append_image(&mut self, payload: &ImagePayload) {
        let uri = match payload {
            ImagePayload::Base64Png(data) if data.is_empty() => return,
            ImagePayload::Base64Png(data) => images::png_data_uri(data),
            ImagePayload::Path(path) if path.as_os_str().is_empty() => return,
            ImagePayload::Path(path) => images::path_data_uri(path),
            ImagePayload::Unsupported(format) => {
                debug!("Ignoring image format {:?}", format);
                return;
            }
        };
        match uri {
            Ok(uri) => self.text.push_str(&images::markdown_image(&uri)),
            Err(e) => warn!("Skipping image: {:#}", e),
        }
    }

    fn open_fence(&mut self, block: OpenBlock) {
        self.close_fence();
        self.text.push_str(CODE_OPEN);
        self.open = Some(block);
    }

    fn close_block(&mut self, block: OpenBlock) {
        match self.open {
            Some(open) if open == block => {
                self.text.push_str(block.closer());
                self.open = None;
            }
            Some(_) => self.close_fence(),
            None => debug!("End of {:?} block without an open fence", block),
        }
    }

    fn close_fence(&mut self) {
        if let Some(open) = self.open.take() {
            self.text.push_str(open.closer());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::decode_record;

    fn render(records: &[&str]) -> String {
        records.iter()
            .flat_map(|r| decode_record(r))
            .fold(Transcript::new(), |t, e| t.fold(&e))
            .finish()
    }

    #[test]
    fn test_message_then_code_block() {
        let md = render(&[
            r#"{"type":"message","start":true}"#,
            r#"{"type":"message","content":"Here:"}"#,
            r#"{"type":"message","end":true}"#,
            r#"{"type":"code","format":"python","start":true}"#,
            r#"{"type":"code","content":"print(1)"}"#,
            r#"{"type":"code","end":true}"#,
        ]);
        assert_eq!(md, "Here:\n```python\nprint(1)\n```\n");
    }

    #[test]
    fn test_code_middles_concatenate_inside_one_fence() {
        let md = render(&[
            r#"{"type":"code","format":"python","start":true}"#,
            r#"{"type":"code","content":"pri"}"#,
            r#"{"type":"code","content":"nt("}"#,
            r#"{"type":"code","content":"1)"}"#,
            r#"{"type":"code","end":true}"#,
        ]);
        assert_eq!(md, "```python\nprint(1)\n```\n");
        assert_eq!(md.matches("```python").count(), 1);
        assert_eq!(md.matches("```").count(), 2);
    }

    #[test]
    fn test_confirmation_uses_short_closer() {
        let md = render(&[
            r#"{"type":"confirmation","start":true}"#,
            r#"{"type":"confirmation","content":{"code":"x = 2"}}"#,
            r#"{"type":"confirmation","end":true}"#,
        ]);
        assert_eq!(md, "```python\nx = 2```\n");
    }

    #[test]
    fn test_console_active_line_marker_and_output() {
        let md = render(&[
            r#"{"type":"console","start":true}"#,
            r#"{"type":"console","format":"active_line","content":null}"#,
            r#"{"type":"console","format":"active_line","content":"3"}"#,
            r#"{"type":"console","format":"output","content":"42"}"#,
            r#"{"type":"console","end":true}"#,
        ]);
        assert_eq!(md, format!("```python\n{}42\n```\n", NO_CONSOLE_OUTPUT));
    }

    #[test]
    fn test_token_limit_notice() {
        let md = render(&[
            r#"{"type":"message","content":"cut"}"#,
            r#"{"type":"message","end":true,"token_limit_reached":true}"#,
        ]);
        assert_eq!(md, format!("cut\n{}", TOKEN_LIMIT_NOTICE));
    }

    #[test]
    fn test_dangling_fence_closed_before_message_and_at_finish() {
        let md = render(&[
            r#"{"type":"code","start":true}"#,
            r#"{"type":"code","content":"a = 1"}"#,
            r#"{"type":"message","content":"Next"}"#,
            r#"{"type":"console","start":true}"#,
            r#"{"type":"console","format":"output","content":"out"}"#,
        ]);
        assert_eq!(md, "```python\na = 1\n```\nNext```python\nout\n```\n");
        assert_eq!(md.matches("```").count() % 2, 0);
    }

    #[test]
    fn test_fences_balanced_for_any_prefix() {
        let records = [
            r#"{"type":"message","content":"Plan"}"#,
            r#"{"type":"code","start":true}"#,
            r#"{"type":"code","content":"x"}"#,
            r#"{"type":"code","end":true}"#,
            r#"{"type":"confirmation","start":true}"#,
            r#"{"type":"confirmation","content":{"code":"y"}}"#,
            r#"{"type":"console","start":true}"#,
            r#"{"type":"console","end":true}"#,
            r#"{"type":"console","end":true}"#,
        ];
        for n in 0..=records.len() {
            let md = render(&records[..n]);
            assert_eq!(md.matches("```").count() % 2, 0, "unbalanced after {} records: {:?}", n, md);
        }
    }

    #[test]
    fn test_unsupported_and_broken_images_are_no_ops() {
        let md = render(&[
            r#"{"type":"image","format":"base64.jpeg","content":"abc"}"#,
            r#"{"type":"image","format":"base64.png","content":"@@@"}"#,
            r#"{"type":"image","format":"path","content":"/nonexistent/plot.png"}"#,
            r#"{"type":"console","format":"weird","content":"x"}"#,
        ]);
        assert_eq!(md, "");
    }

    #[test]
    fn test_image_path_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chart.svg");
        std::fs::write(&path, b"<svg/>").unwrap();
        let record = serde_json::json!({"type": "image", "format": "path", "content": path, "start": true, "end": true});
        let record = record.to_string();
        let md = render(&[record.as_str()]);
        assert!(md.starts_with("\n![Image](data:image/svg;base64,"));
        assert!(md.ends_with(")\n\n"));
    }
}
