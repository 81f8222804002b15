//! Interview session coordination
//!
//! This module provides the `SessionController` that manages:
//! - Candidate profile resolution at bootstrap
//! - Microphone acquisition, mute and release
//! - The realtime agent session and its transcript
//! - Lifecycle state, published to the presentation layer

pub mod controller;
mod handle;
pub mod params;
pub mod state;
mod status;
pub mod transcript;

pub use controller::{SessionController, SessionSettings};
pub use handle::{ControllerGone, SessionHandle};
pub use params::{BootstrapParams, SessionParameters};
pub use state::{AttemptId, FailureCause, SessionPhase};
pub use status::{SessionStatus, SessionUpdate};
pub use transcript::{Message, Speaker, TranscriptLog};
