use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Who produced a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The human being interviewed (local microphone)
    Candidate,
    /// The remote conversational agent
    Agent,
}

impl Speaker {
    /// Label shown next to each bubble in the chat view
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::Candidate => "Você",
            Speaker::Agent => "Recrutador",
        }
    }
}

/// A single exchanged message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who said it
    pub source: Speaker,

    /// What was said
    pub text: String,

    /// When the controller received it
    pub received_at: DateTime<Utc>,
}

impl Message {
    pub fn new(source: Speaker, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
            received_at: Utc::now(),
        }
    }

    pub fn candidate(text: impl Into<String>) -> Self {
        Self::new(Speaker::Candidate, text)
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(Speaker::Agent, text)
    }
}

/// Append-only, insertion-ordered record of the current session's messages.
///
/// Only appended to or cleared wholesale; presentation reads it through
/// [`TranscriptLog::snapshot`], which is rebuilt only after a change.
#[derive(Debug, Default)]
pub struct TranscriptLog {
    messages: Vec<Message>,
    snapshot: Option<Arc<[Message]>>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
        self.snapshot = None;
    }

    pub fn clear(&mut self) {
        if !self.messages.is_empty() {
            self.messages.clear();
            self.snapshot = None;
        }
    }

    /// Immutable copy of everything appended so far, in arrival order.
    /// Repeated calls without an append or clear in between share one copy.
    pub fn snapshot(&mut self) -> Arc<[Message]> {
        let messages = &self.messages;
        Arc::clone(
            self.snapshot
                .get_or_insert_with(|| Arc::from(messages.as_slice())),
        )
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
