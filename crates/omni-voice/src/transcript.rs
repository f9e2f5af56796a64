//! Call transcript: an append-only, insertion-ordered log of who said what.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Caller,
    System,
    Dispatch,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Speaker::Caller => "Caller",
            Speaker::System => "System",
            Speaker::Dispatch => "Dispatch",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Entries are only ever appended; order is the order events were observed.
#[derive(Debug, Clone, Default)]
pub struct TranscriptLog {
    entries: Vec<TranscriptEntry>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line and return a copy of it for event fan-out.
    pub fn append(&mut self, speaker: Speaker, text: impl Into<String>) -> TranscriptEntry {
        let entry = TranscriptEntry {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        };
        self.entries.push(entry.clone());
        entry
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    /// Lines spoken by one party, in order.
    pub fn by(&self, speaker: Speaker) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter().filter(move |e| e.speaker == speaker)
    }

    pub fn contains_text(&self, text: &str) -> bool {
        self.entries.iter().any(|e| e.text == text)
    }
}

/// Render a call duration as `mm:ss`.
pub fn format_duration(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
