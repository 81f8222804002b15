use super::state::{FailureCause, SessionPhase, SessionState};
use super::transcript::Message;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// What the presentation layer sees after every processed event
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub phase: SessionPhase,

    /// Cause tag while `Failed`
    pub failure: Option<FailureCause>,

    /// Microphone muted (only ever true while connected)
    pub muted: bool,

    pub candidate_name: Option<String>,
    pub job_title: Option<String>,

    /// When the agent confirmed the current session
    pub connected_at: Option<DateTime<Utc>>,

    /// Number of messages in the transcript
    pub transcript_len: usize,

    /// Caption of the single start/stop button
    pub action_label: &'static str,

    /// Immutable transcript snapshot; served separately over HTTP
    #[serde(skip)]
    pub transcript: Arc<[Message]>,
}

impl SessionStatus {
    pub fn capture(state: &SessionState, transcript: Arc<[Message]>) -> Self {
        let bootstrap = state.bootstrap();
        let phase = state.phase();

        let action_label = if phase == SessionPhase::Connected {
            "Encerrar Entrevista"
        } else if transcript.is_empty() {
            "Começar Entrevista"
        } else {
            "Nova Entrevista"
        };

        Self {
            phase,
            failure: state.failure().cloned(),
            muted: state.muted(),
            candidate_name: bootstrap.map(|b| b.candidate_name().to_string()),
            job_title: bootstrap.map(|b| b.job_title().to_string()),
            connected_at: state.connected_at(),
            transcript_len: transcript.len(),
            action_label,
            transcript,
        }
    }
}

/// One entry per phase change, broadcast to subscribers
#[derive(Debug, Clone, Serialize)]
pub struct SessionUpdate {
    pub phase: SessionPhase,
    pub failure: Option<FailureCause>,
    pub at: DateTime<Utc>,
}
