//! HTTP API for the interview page
//!
//! This module provides a REST API over the single session controller:
//! - POST /session/bootstrap - Resolve the candidate and become ready
//! - POST /session/retry - Repeat a failed bootstrap
//! - POST /session/start - Start the interview
//! - POST /session/end - End or cancel the interview
//! - POST /session/mute - Mute or unmute the microphone
//! - GET /session - Query session status
//! - GET /session/transcript - Get the conversation so far
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{BootstrapQuery, ErrorResponse, MuteRequest, TranscriptEntry};
pub use routes::create_router;
pub use state::AppState;
