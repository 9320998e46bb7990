//! Running transcript of a call.
//!
//! The live service streams transcription in small fragments ("Hel", "lo").
//! Consecutive fragments from the same speaker within one turn are merged into
//! a single displayed line; a turn boundary seals the line so the next
//! fragment, even from the same speaker, starts a new one. Each speaker keeps
//! one running buffer for the whole turn, so a line that resumes after the
//! other speaker cut in shows everything that speaker has said so far.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptLine {
    pub role: Role,
    pub text: String,
    /// Still accepting fragments for the current turn.
    #[serde(skip)]
    open: bool,
}

impl TranscriptLine {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            open: false,
        }
    }
}

/// Merges incremental fragments per speaker into displayed lines.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    lines: Vec<TranscriptLine>,
    user_buffer: String,
    assistant_buffer: String,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer_mut(&mut self, role: Role) -> &mut String {
        match role {
            Role::User => &mut self.user_buffer,
            Role::Assistant => &mut self.assistant_buffer,
        }
    }

    /// Add a fragment for `role`.
    ///
    /// If the last line belongs to the same speaker and is still open, its
    /// text is replaced with the running concatenation; otherwise a new line is
    /// appended carrying that concatenation. Returns `false` when the fragment
    /// was empty and nothing changed.
    pub fn append_fragment(&mut self, role: Role, fragment: &str) -> bool {
        if fragment.is_empty() {
            return false;
        }

        let merge = matches!(self.lines.last(), Some(last) if last.role == role && last.open);
        let buffer = self.buffer_mut(role);
        buffer.push_str(fragment);
        let text = buffer.clone();

        match self.lines.last_mut() {
            Some(last) if merge => last.text = text,
            _ => self.lines.push(TranscriptLine {
                role,
                text,
                open: true,
            }),
        }
        true
    }

    /// Turn boundary: reset both fragment buffers, keep displayed history.
    pub fn complete_turn(&mut self) {
        self.reset_fragments();
    }

    /// A complete message typed by the user. Always its own line.
    pub fn push_message(&mut self, role: Role, text: &str) {
        self.seal();
        self.buffer_mut(role).clear();
        self.lines.push(TranscriptLine::new(role, text));
    }

    /// Drop the per-turn buffers (session teardown, turn completion).
    pub fn reset_fragments(&mut self) {
        self.seal();
        self.user_buffer.clear();
        self.assistant_buffer.clear();
    }

    fn seal(&mut self) {
        if let Some(last) = self.lines.last_mut() {
            last.open = false;
        }
    }

    pub fn lines(&self) -> &[TranscriptLine] {
        &self.lines
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
