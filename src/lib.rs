pub mod audio;
pub mod config;
pub mod conversation;
pub mod http;
pub mod profile;
pub mod session;

pub use audio::{AudioDeviceManager, AudioError, CaptureDeviceManager, MicrophoneHandle};
pub use config::Config;
pub use conversation::{ConversationClient, SessionOpenPayload, WebSocketConversationClient};
pub use http::{create_router, AppState};
pub use profile::{CandidateProfile, HttpProfileRepository, ProfileRepository};
pub use session::{
    BootstrapParams, FailureCause, SessionController, SessionHandle, SessionPhase,
    SessionSettings, SessionStatus,
};
