use super::backend::AudioFrame;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    /// The user (or the platform) refused microphone access
    #[error("microphone permission denied")]
    PermissionDenied,

    /// The device is missing, busy or failed while starting
    #[error("audio device error: {0}")]
    Device(String),
}

/// Exclusive claim on the default microphone for one session attempt.
///
/// Not `Clone`: exactly one owner releases it. The uplink carries captured
/// frames toward the conversation transport and can be taken once.
#[derive(Debug)]
pub struct MicrophoneHandle {
    id: Uuid,
    uplink: Option<mpsc::Receiver<AudioFrame>>,
}

impl MicrophoneHandle {
    pub fn new(uplink: Option<mpsc::Receiver<AudioFrame>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            uplink,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Take the captured-frame stream; `None` after the first call
    pub fn take_uplink(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.uplink.take()
    }
}

/// Acquires and releases the local microphone.
///
/// `acquire` may wait on a permission prompt for an unbounded time and must be
/// cancel-safe: dropping the future before it resolves leaves no device held.
#[async_trait::async_trait]
pub trait AudioDeviceManager: Send + Sync {
    async fn acquire(&self) -> Result<MicrophoneHandle, AudioError>;

    /// Stop or resume sending captured audio upstream without tearing down
    /// the capture. Setting the current value again has no effect.
    fn set_muted(&self, handle: &MicrophoneHandle, muted: bool) -> Result<(), AudioError>;

    /// Stop all tracks and free the device. No-op for an already released handle.
    async fn release(&self, handle: &MicrophoneHandle);
}
