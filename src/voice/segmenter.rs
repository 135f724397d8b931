//! Sentence segmentation for streamed speech
//!
//! Turns streamed message text into [`SpeechUnit`]s that are safe to
//! synthesize one clip at a time. Text inside fenced code blocks is never
//! spoken, and a unit never spans a fence.

/// Markdown code fence delimiter
pub const FENCE: &str = "```";

/// A trimmed, non-empty span of speakable text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechUnit(String);

impl SpeechUnit {
    /// `None` for empty or whitespace-only text
    pub fn new(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn text(&self) -> &str {
        &self.0
    }

    pub fn into_text(self) -> String {
        self.0
    }
}

impl std::fmt::Display for SpeechUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | ':')
}

/// Streaming sentence splitter with code-block tracking
#[derive(Debug, Default)]
pub struct SpeechSegmenter {
    in_code_block: bool,
    pending: String,
}

impl SpeechSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_code_block(&self) -> bool {
        self.in_code_block
    }

    /// Text received but not yet emitted
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Feed one chunk of message text
    pub fn feed(&mut self, chunk: &str) -> Vec<SpeechUnit> {
        let fences = chunk.matches(FENCE).count();
        if fences > 0 {
            let mut units = Vec::new();
            for _ in 0..fences {
                self.in_code_block = !self.in_code_block;
                if self.in_code_block {
                    units.extend(SpeechUnit::new(&self.pending));
                    self.pending.clear();
                }
            }
            return units;
        }

        if self.in_code_block {
            return Vec::new();
        }

        self.pending.push_str(chunk);
        self.split_complete_sentences()
    }

    /// Flush the trailing fragment at turn end
    pub fn finish(&mut self) -> Option<SpeechUnit> {
        let pending = std::mem::take(&mut self.pending);
        if self.in_code_block {
            return None;
        }
        SpeechUnit::new(&pending)
    }

    /// Emit every sentence terminated by punctuation that is not preceded by
    /// a digit and is followed by whitespace.
    fn split_complete_sentences(&mut self) -> Vec<SpeechUnit> {
        let mut units = Vec::new();
        let mut sentence_start = 0;
        let mut prev: Option<char> = None;
        let mut chars = self.pending.char_indices().peekable();

        while let Some((idx, c)) = chars.next() {
            let after_digit = prev.map_or(false, |p| p.is_ascii_digit());
            let followed_by_space = chars.peek().map_or(false, |(_, next)| next.is_whitespace());

            if is_terminator(c) && !after_digit && followed_by_space {
                let end = idx + c.len_utf8();
                units.extend(SpeechUnit::new(&self.pending[sentence_start..end]));
                // Skip the whitespace run that closed the sentence
                let mut next_start = end;
                while let Some(&(ws_idx, ws)) = chars.peek() {
                    if !ws.is_whitespace() {
                        break;
                    }
                    next_start = ws_idx + ws.len_utf8();
                    chars.next();
                }
                sentence_start = next_start;
                prev = None;
                continue;
            }
            prev = Some(c);
        }

        self.pending = self.pending[sentence_start..].to_string();
        units
    }
}
