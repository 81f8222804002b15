use crate::audio::AudioFrame;
use crate::session::params::SessionParameters;
use crate::session::state::{AttemptId, Event};
use crate::session::transcript::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    /// The transport could not be established or the agent rejected the session
    #[error("failed to connect to agent: {0}")]
    Connect(String),

    /// The agent sent something we could not understand
    #[error("agent protocol error: {0}")]
    Protocol(String),

    /// The connection ended before the session was confirmed
    #[error("agent connection closed: {0}")]
    Closed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    WebSocket,
}

/// Variables the agent interpolates into its interview script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicVariables {
    pub job_title: String,
    pub company_name: String,
    pub job_description: String,
    pub candidate_resume: String,
    pub candidate_name: String,
}

/// Session-open request sent to the conversation transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOpenPayload {
    pub agent_identifier: String,
    pub transport_kind: TransportKind,
    pub variables: DynamicVariables,
}

impl SessionOpenPayload {
    pub fn new(agent_identifier: impl Into<String>, params: &SessionParameters) -> Self {
        Self {
            agent_identifier: agent_identifier.into(),
            transport_kind: TransportKind::WebSocket,
            variables: DynamicVariables {
                job_title: params.job_title.clone(),
                company_name: params.company_name.clone(),
                job_description: params.job_description.clone(),
                candidate_resume: params.resume_context.clone(),
                candidate_name: params.candidate_name.clone(),
            },
        }
    }
}

/// Where a transport reports what happens to the session it opened.
///
/// Every report is tagged with the attempt that issued `open`, so reports
/// from a session the controller has moved past are recognised as stale.
#[derive(Debug, Clone)]
pub struct ConversationEvents {
    attempt: AttemptId,
    tx: mpsc::UnboundedSender<Event>,
}

impl ConversationEvents {
    pub fn new(attempt: AttemptId, tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { attempt, tx }
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn connected(&self) {
        self.post(Event::AgentConnected {
            attempt: self.attempt,
        });
    }

    pub fn disconnected(&self) {
        self.post(Event::AgentDisconnected {
            attempt: self.attempt,
        });
    }

    pub fn message(&self, message: Message) {
        self.post(Event::AgentMessage {
            attempt: self.attempt,
            message,
        });
    }

    pub fn error(&self, cause: impl Into<String>) {
        self.post(Event::AgentError {
            attempt: self.attempt,
            cause: cause.into(),
        });
    }

    fn post(&self, event: Event) {
        if self.tx.send(event).is_err() {
            debug!("Session controller gone; dropping agent event");
        }
    }
}

/// Realtime session with the remote interviewer agent.
///
/// `open` resolves once the transport gave up or handed the live session to
/// background tasks. Success is only ever signalled through
/// [`ConversationEvents::connected`]; an `Err` return means the session never
/// connected and no `connected` was or will be reported.
#[async_trait::async_trait]
pub trait ConversationClient: Send + Sync {
    async fn open(
        &self,
        payload: SessionOpenPayload,
        uplink: Option<mpsc::Receiver<AudioFrame>>,
        events: ConversationEvents,
    ) -> Result<(), ConversationError>;

    /// End the current session. Reports `disconnected` for a connected
    /// session; no-op when nothing is open.
    async fn close(&self);
}
