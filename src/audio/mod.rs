pub mod backend;
pub mod capture;
pub mod device;
pub mod microphone;
pub mod playback;
pub mod resample;

pub use backend::{AudioBackend, AudioBackendConfig, AudioFrame, SilenceBackend};
pub use capture::CaptureDeviceManager;
pub use device::{AudioDeviceManager, AudioError, MicrophoneHandle};
pub use microphone::CpalBackend;
pub use playback::{AudioPlayback, SpeakerPlayback};
