//! Session lifecycle state machine
//!
//! All transitions go through [`reduce`], which returns the next state and the
//! effects the controller must run. The reducer never touches collaborators;
//! every asynchronous result comes back as another [`Event`] tagged with the
//! [`AttemptId`] that requested it, and results for an attempt that is no
//! longer current are dropped.

use super::params::{BootstrapParams, SessionContext, SessionParameters};
use super::transcript::Message;
use crate::audio::{AudioError, MicrophoneHandle};
use crate::profile::{CandidateProfile, ProfileError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Identifies one profile lookup or one session attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(Uuid);

impl AttemptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why the current attempt ended up in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "cause", content = "detail")]
pub enum FailureCause {
    #[error("no candidate identifier supplied")]
    MissingIdentifier,

    #[error("candidate profile not found")]
    ProfileNotFound,

    #[error("profile lookup failed: {0}")]
    #[serde(rename = "ProfileTransportError")]
    ProfileTransport(String),

    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("audio device error: {0}")]
    #[serde(rename = "DeviceError")]
    Device(String),

    #[error("could not connect to the agent: {0}")]
    #[serde(rename = "AgentConnectError")]
    AgentConnect(String),

    #[error("agent session failed: {0}")]
    #[serde(rename = "AgentRuntimeError")]
    AgentRuntime(String),
}

impl FailureCause {
    pub fn tag(&self) -> &'static str {
        match self {
            FailureCause::MissingIdentifier => "MissingIdentifier",
            FailureCause::ProfileNotFound => "ProfileNotFound",
            FailureCause::ProfileTransport(_) => "ProfileTransportError",
            FailureCause::PermissionDenied => "PermissionDenied",
            FailureCause::Device(_) => "DeviceError",
            FailureCause::AgentConnect(_) => "AgentConnectError",
            FailureCause::AgentRuntime(_) => "AgentRuntimeError",
        }
    }
}

impl From<ProfileError> for FailureCause {
    fn from(err: ProfileError) -> Self {
        match err {
            ProfileError::NotFound => FailureCause::ProfileNotFound,
            ProfileError::Transport(e) => FailureCause::ProfileTransport(e),
        }
    }
}

impl From<AudioError> for FailureCause {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::PermissionDenied => FailureCause::PermissionDenied,
            AudioError::Device(e) => FailureCause::Device(e),
        }
    }
}

/// Flat view of [`SessionState`] for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionPhase {
    Idle,
    ResolvingProfile,
    Ready,
    AcquiringMedia,
    Connecting,
    Connected,
    Disconnecting,
    Failed,
}

/// What started a teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    UserRequested,
    RemoteDisconnected,
    TimeLimit,
    AgentError(String),
}

#[derive(Debug, Clone, Default)]
pub enum SessionState {
    #[default]
    Idle,
    ResolvingProfile {
        attempt: AttemptId,
        bootstrap: Arc<BootstrapParams>,
    },
    Ready {
        context: Arc<SessionContext>,
    },
    AcquiringMedia {
        attempt: AttemptId,
        context: Arc<SessionContext>,
        params: Arc<SessionParameters>,
    },
    Connecting {
        attempt: AttemptId,
        context: Arc<SessionContext>,
        params: Arc<SessionParameters>,
    },
    Connected {
        attempt: AttemptId,
        context: Arc<SessionContext>,
        params: Arc<SessionParameters>,
        muted: bool,
        connected_at: DateTime<Utc>,
    },
    Disconnecting {
        attempt: AttemptId,
        context: Arc<SessionContext>,
        reason: EndReason,
    },
    Failed {
        cause: FailureCause,
        bootstrap: Arc<BootstrapParams>,
    },
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::ResolvingProfile { .. } => SessionPhase::ResolvingProfile,
            SessionState::Ready { .. } => SessionPhase::Ready,
            SessionState::AcquiringMedia { .. } => SessionPhase::AcquiringMedia,
            SessionState::Connecting { .. } => SessionPhase::Connecting,
            SessionState::Connected { .. } => SessionPhase::Connected,
            SessionState::Disconnecting { .. } => SessionPhase::Disconnecting,
            SessionState::Failed { .. } => SessionPhase::Failed,
        }
    }

    pub fn attempt(&self) -> Option<AttemptId> {
        match self {
            SessionState::ResolvingProfile { attempt, .. }
            | SessionState::AcquiringMedia { attempt, .. }
            | SessionState::Connecting { attempt, .. }
            | SessionState::Connected { attempt, .. }
            | SessionState::Disconnecting { attempt, .. } => Some(*attempt),
            SessionState::Idle | SessionState::Ready { .. } | SessionState::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureCause> {
        match self {
            SessionState::Failed { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Mute only means something while connected
    pub fn muted(&self) -> bool {
        matches!(self, SessionState::Connected { muted: true, .. })
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        match self {
            SessionState::Connected { connected_at, .. } => Some(*connected_at),
            _ => None,
        }
    }

    /// Bootstrap parameters of the current or last attempt
    pub fn bootstrap(&self) -> Option<&BootstrapParams> {
        match self {
            SessionState::Idle => None,
            SessionState::ResolvingProfile { bootstrap, .. }
            | SessionState::Failed { bootstrap, .. } => Some(bootstrap),
            SessionState::Ready { context }
            | SessionState::AcquiringMedia { context, .. }
            | SessionState::Connecting { context, .. }
            | SessionState::Connected { context, .. }
            | SessionState::Disconnecting { context, .. } => Some(&context.bootstrap),
        }
    }
}

/// Inputs to the state machine: presentation commands and collaborator results
#[derive(Debug)]
pub enum Event {
    // Commands
    Bootstrap(BootstrapParams),
    Retry,
    Start,
    End,
    SetMuted(bool),
    /// Stop the controller loop; handled by the controller, not the reducer
    Shutdown,

    // Collaborator results
    ProfileResolved {
        attempt: AttemptId,
        result: Result<CandidateProfile, ProfileError>,
    },
    MicrophoneAcquired {
        attempt: AttemptId,
        result: Result<MicrophoneHandle, AudioError>,
    },
    AgentConnected {
        attempt: AttemptId,
    },
    AgentDisconnected {
        attempt: AttemptId,
    },
    AgentMessage {
        attempt: AttemptId,
        message: Message,
    },
    AgentError {
        attempt: AttemptId,
        cause: String,
    },
    /// The device refused a mute change; `muted` is the value that was asked for
    MuteFailed {
        attempt: AttemptId,
        muted: bool,
    },
    TimeLimitReached {
        attempt: AttemptId,
    },
    TeardownComplete {
        attempt: AttemptId,
    },
}

/// Work the controller performs after a transition
#[derive(Debug)]
pub enum Effect {
    FetchProfile {
        attempt: AttemptId,
        candidate_id: String,
    },
    ClearTranscript,
    AcquireMicrophone {
        attempt: AttemptId,
    },
    /// Abort an acquisition that is still waiting
    CancelAcquire {
        attempt: AttemptId,
    },
    HoldMicrophone(MicrophoneHandle),
    OpenSession {
        attempt: AttemptId,
        params: Arc<SessionParameters>,
    },
    AppendMessage(Message),
    ApplyMute {
        attempt: AttemptId,
        muted: bool,
    },
    StartTimeLimit {
        attempt: AttemptId,
    },
    /// Abort a pending open, close the agent session, release the held
    /// microphone, then report `TeardownComplete`
    Teardown {
        attempt: AttemptId,
    },
    ReleaseHeldMicrophone,
    /// Release a handle that arrived for an abandoned attempt
    ReleaseMicrophone(MicrophoneHandle),
}

fn begin_bootstrap(bootstrap: Arc<BootstrapParams>) -> (SessionState, Vec<Effect>) {
    match bootstrap.candidate_id() {
        Some(candidate_id) => {
            let attempt = AttemptId::new();
            let candidate_id = candidate_id.to_string();
            (
                SessionState::ResolvingProfile { attempt, bootstrap },
                vec![Effect::FetchProfile {
                    attempt,
                    candidate_id,
                }],
            )
        }
        None => (
            SessionState::Failed {
                cause: FailureCause::MissingIdentifier,
                bootstrap,
            },
            vec![],
        ),
    }
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Results for a stale attempt are ignored (a stale microphone is released)
/// - Events that do not apply to the current state are dropped
/// - Teardown is idempotent: once `Disconnecting`, further end signals are ignored
pub fn reduce(state: &SessionState, event: Event) -> (SessionState, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use SessionState::*;

    match (state, event) {
        // -----------------
        // Bootstrap / retry
        // -----------------
        (Idle | Ready { .. } | Failed { .. }, Bootstrap(params)) => {
            begin_bootstrap(Arc::new(params))
        }
        (Failed { bootstrap, .. }, Retry) => begin_bootstrap(Arc::clone(bootstrap)),

        // -----------------
        // ResolvingProfile
        // -----------------
        (ResolvingProfile { attempt, bootstrap }, ProfileResolved { attempt: id, result })
            if *attempt == id =>
        {
            match result {
                Ok(profile) => (
                    Ready {
                        context: Arc::new(SessionContext {
                            bootstrap: Arc::clone(bootstrap),
                            profile,
                        }),
                    },
                    vec![],
                ),
                Err(err) => (
                    Failed {
                        cause: err.into(),
                        bootstrap: Arc::clone(bootstrap),
                    },
                    vec![],
                ),
            }
        }

        // -----------------
        // Ready
        // -----------------
        (Ready { context }, Start) => {
            let attempt = AttemptId::new();
            let params = Arc::new(SessionParameters::resolve(context));
            (
                AcquiringMedia {
                    attempt,
                    context: Arc::clone(context),
                    params,
                },
                vec![ClearTranscript, AcquireMicrophone { attempt }],
            )
        }

        // -----------------
        // AcquiringMedia
        // -----------------
        (
            AcquiringMedia {
                attempt,
                context,
                params,
            },
            MicrophoneAcquired { attempt: id, result },
        ) if *attempt == id => match result {
            Ok(handle) => (
                Connecting {
                    attempt: *attempt,
                    context: Arc::clone(context),
                    params: Arc::clone(params),
                },
                vec![
                    HoldMicrophone(handle),
                    OpenSession {
                        attempt: *attempt,
                        params: Arc::clone(params),
                    },
                ],
            ),
            Err(err) => (
                Failed {
                    cause: err.into(),
                    bootstrap: Arc::clone(&context.bootstrap),
                },
                vec![],
            ),
        },
        // Cancel while the permission prompt is still up
        (AcquiringMedia { attempt, context, .. }, End) => (
            Ready {
                context: Arc::clone(context),
            },
            vec![CancelAcquire { attempt: *attempt }],
        ),

        // -----------------
        // Connecting
        // -----------------
        (
            Connecting {
                attempt,
                context,
                params,
            },
            AgentConnected { attempt: id },
        ) if *attempt == id => (
            Connected {
                attempt: *attempt,
                context: Arc::clone(context),
                params: Arc::clone(params),
                muted: false,
                connected_at: Utc::now(),
            },
            vec![StartTimeLimit { attempt: *attempt }],
        ),
        (Connecting { attempt, context, .. }, AgentError { attempt: id, cause })
            if *attempt == id =>
        {
            (
                Failed {
                    cause: FailureCause::AgentConnect(cause),
                    bootstrap: Arc::clone(&context.bootstrap),
                },
                vec![ReleaseHeldMicrophone],
            )
        }
        (Connecting { attempt, context, .. }, AgentDisconnected { attempt: id })
            if *attempt == id =>
        {
            (
                Failed {
                    cause: FailureCause::AgentConnect(
                        "connection closed before the session started".to_string(),
                    ),
                    bootstrap: Arc::clone(&context.bootstrap),
                },
                vec![ReleaseHeldMicrophone],
            )
        }
        (Connecting { attempt, context, .. }, End) => (
            Disconnecting {
                attempt: *attempt,
                context: Arc::clone(context),
                reason: EndReason::UserRequested,
            },
            vec![Teardown { attempt: *attempt }],
        ),

        // -----------------
        // Connected
        // -----------------
        (Connected { attempt, .. }, AgentMessage { attempt: id, message }) if *attempt == id => {
            (state.clone(), vec![AppendMessage(message)])
        }
        (
            Connected {
                attempt,
                context,
                params,
                muted,
                connected_at,
            },
            SetMuted(requested),
        ) => {
            if *muted == requested {
                (state.clone(), vec![])
            } else {
                (
                    Connected {
                        attempt: *attempt,
                        context: Arc::clone(context),
                        params: Arc::clone(params),
                        muted: requested,
                        connected_at: *connected_at,
                    },
                    vec![ApplyMute {
                        attempt: *attempt,
                        muted: requested,
                    }],
                )
            }
        }
        // Keep the reported mute state in line with the device
        (
            Connected {
                attempt,
                context,
                params,
                muted,
                connected_at,
            },
            MuteFailed {
                attempt: id,
                muted: requested,
            },
        ) if *attempt == id && *muted == requested => (
            Connected {
                attempt: *attempt,
                context: Arc::clone(context),
                params: Arc::clone(params),
                muted: !requested,
                connected_at: *connected_at,
            },
            vec![],
        ),
        (Connected { attempt, context, .. }, End) => {
            disconnect(*attempt, context, EndReason::UserRequested)
        }
        (Connected { attempt, context, .. }, AgentDisconnected { attempt: id })
            if *attempt == id =>
        {
            disconnect(*attempt, context, EndReason::RemoteDisconnected)
        }
        (Connected { attempt, context, .. }, AgentError { attempt: id, cause })
            if *attempt == id =>
        {
            disconnect(*attempt, context, EndReason::AgentError(cause))
        }
        (Connected { attempt, context, .. }, TimeLimitReached { attempt: id })
            if *attempt == id =>
        {
            disconnect(*attempt, context, EndReason::TimeLimit)
        }

        // -----------------
        // Disconnecting
        // -----------------
        // The transcript stays open until teardown has finished
        (Disconnecting { attempt, .. }, AgentMessage { attempt: id, message })
            if *attempt == id =>
        {
            (state.clone(), vec![AppendMessage(message)])
        }
        (
            Disconnecting {
                attempt,
                context,
                reason,
            },
            TeardownComplete { attempt: id },
        ) if *attempt == id => match reason {
            EndReason::AgentError(cause) => (
                Failed {
                    cause: FailureCause::AgentRuntime(cause.clone()),
                    bootstrap: Arc::clone(&context.bootstrap),
                },
                vec![],
            ),
            _ => (
                Ready {
                    context: Arc::clone(context),
                },
                vec![],
            ),
        },

        // -----------------
        // Stale results
        // -----------------
        (_, MicrophoneAcquired { attempt, result: Ok(handle) }) => {
            debug!("Releasing microphone from abandoned attempt {}", attempt);
            (state.clone(), vec![ReleaseMicrophone(handle)])
        }

        // -----------------
        // Unhandled: no transition
        // -----------------
        (_, event) => {
            debug!("Ignoring {:?} in {:?}", event, state.phase());
            (state.clone(), vec![])
        }
    }
}

fn disconnect(
    attempt: AttemptId,
    context: &Arc<SessionContext>,
    reason: EndReason,
) -> (SessionState, Vec<Effect>) {
    (
        SessionState::Disconnecting {
            attempt,
            context: Arc::clone(context),
            reason,
        },
        vec![Effect::Teardown { attempt }],
    )
}
