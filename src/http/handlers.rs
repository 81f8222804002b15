use super::state::AppState;
use crate::session::{BootstrapParams, ControllerGone, Message, SessionPhase, Speaker};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Parameters the hosting page passes in its URL
#[derive(Debug, Default, Deserialize)]
pub struct BootstrapQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub description: Option<String>,
}

impl From<BootstrapQuery> for BootstrapParams {
    fn from(query: BootstrapQuery) -> Self {
        Self {
            candidate_id: query.user_id,
            candidate_name: query.name,
            job_title: query.title,
            company_name: query.company,
            job_description: query.description,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// One chat bubble as rendered by the page
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub source: Speaker,
    pub label: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl From<&Message> for TranscriptEntry {
    fn from(message: &Message) -> Self {
        Self {
            source: message.source,
            label: message.source.label().to_string(),
            text: message.text.clone(),
            received_at: message.received_at,
        }
    }
}

fn accepted(message: &str) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(CommandResponse {
            status: "accepted".to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn controller_gone(e: ControllerGone) -> Response {
    error!("Cannot reach session: {}", e);
    error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
}

fn wrong_phase(action: &str, phase: SessionPhase) -> Response {
    warn!("Rejected {} in {:?}", action, phase);
    error_response(
        StatusCode::CONFLICT,
        format!("Cannot {} while session is {:?}", action, phase),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/bootstrap?userId=&name=&title=&company=&description=
/// Resolve the candidate profile for a new interview
pub async fn bootstrap(
    State(state): State<AppState>,
    Query(query): Query<BootstrapQuery>,
) -> Response {
    info!("Bootstrap requested for candidate {:?}", query.user_id);

    match state.session.bootstrap(query.into()) {
        Ok(()) => accepted("Resolving candidate profile"),
        Err(e) => controller_gone(e),
    }
}

/// POST /session/retry
/// Repeat the last bootstrap after a failure
pub async fn retry(State(state): State<AppState>) -> Response {
    match state.session.retry() {
        Ok(()) => accepted("Retrying bootstrap"),
        Err(e) => controller_gone(e),
    }
}

/// POST /session/start
/// Start the interview; only valid once the session is ready
pub async fn start_session(State(state): State<AppState>) -> Response {
    let phase = state.session.status().phase;
    if phase != SessionPhase::Ready {
        return wrong_phase("start", phase);
    }

    match state.session.start() {
        Ok(()) => accepted("Starting interview"),
        Err(e) => controller_gone(e),
    }
}

/// POST /session/end
/// End a running interview or cancel one that is still starting
pub async fn end_session(State(state): State<AppState>) -> Response {
    match state.session.end() {
        Ok(()) => accepted("Ending interview"),
        Err(e) => controller_gone(e),
    }
}

/// POST /session/mute
/// Mute or unmute the microphone during a connected session
pub async fn set_muted(
    State(state): State<AppState>,
    Json(req): Json<MuteRequest>,
) -> Response {
    let phase = state.session.status().phase;
    if phase != SessionPhase::Connected {
        return wrong_phase("change mute", phase);
    }

    match state.session.set_muted(req.muted) {
        Ok(()) => (
            StatusCode::OK,
            Json(CommandResponse {
                status: if req.muted { "muted" } else { "unmuted" }.to_string(),
                message: "Mute state updated".to_string(),
            }),
        )
            .into_response(),
        Err(e) => controller_gone(e),
    }
}

/// GET /session
/// Current session status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.session.status()))
}

/// GET /session/transcript
/// Messages exchanged so far, oldest first
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    let transcript = state.session.transcript();
    let entries: Vec<TranscriptEntry> = transcript.iter().map(TranscriptEntry::from).collect();
    (StatusCode::OK, Json(entries))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
