use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, SilenceBackend};
use super::device::{AudioDeviceManager, AudioError, MicrophoneHandle};
use super::microphone::CpalBackend;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type BackendFactory = dyn Fn(&AudioBackendConfig) -> Box<dyn AudioBackend> + Send + Sync;

/// The capture currently claimed by a handle
struct ActiveCapture {
    handle_id: Uuid,
    backend: Box<dyn AudioBackend>,
    muted: Arc<AtomicBool>,
    forwarder: JoinHandle<()>,
}

/// [`AudioDeviceManager`] over a single [`AudioBackend`] at a time.
///
/// Frames flow backend -> forwarder task -> handle uplink. Muting makes the
/// forwarder drop frames while the backend keeps capturing.
pub struct CaptureDeviceManager {
    config: AudioBackendConfig,
    factory: Box<BackendFactory>,
    active: Mutex<Option<ActiveCapture>>,
}

impl CaptureDeviceManager {
    pub fn new<F>(config: AudioBackendConfig, factory: F) -> Self
    where
        F: Fn(&AudioBackendConfig) -> Box<dyn AudioBackend> + Send + Sync + 'static,
    {
        Self {
            config,
            factory: Box::new(factory),
            active: Mutex::new(None),
        }
    }

    /// Manager that captures from the default input device
    pub fn microphone(config: AudioBackendConfig) -> Self {
        Self::new(config, |config| Box::new(CpalBackend::new(config.clone())))
    }

    /// Manager that captures from a [`SilenceBackend`]
    pub fn silent(config: AudioBackendConfig) -> Self {
        Self::new(config, |config| Box::new(SilenceBackend::new(config.clone())))
    }

    /// Whether any handle currently holds the device
    pub fn is_held(&self) -> bool {
        self.active
            .lock()
            .map(|active| active.is_some())
            .unwrap_or(false)
    }

    fn spawn_forwarder(
        mut frames: mpsc::Receiver<AudioFrame>,
        uplink: mpsc::Sender<AudioFrame>,
        muted: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if muted.load(Ordering::SeqCst) {
                    continue;
                }
                if uplink.send(frame).await.is_err() {
                    debug!("Microphone uplink closed");
                    break;
                }
            }
            debug!("Microphone forwarder stopped");
        })
    }
}

#[async_trait::async_trait]
impl AudioDeviceManager for CaptureDeviceManager {
    async fn acquire(&self) -> Result<MicrophoneHandle, AudioError> {
        if self.is_held() {
            return Err(AudioError::Device("microphone already in use".to_string()));
        }

        let mut backend = (self.factory)(&self.config);
        info!("Acquiring microphone via {} backend", backend.name());

        let frames = backend.start().await?;

        let (uplink_tx, uplink_rx) = mpsc::channel(64);
        let handle = MicrophoneHandle::new(Some(uplink_rx));
        let muted = Arc::new(AtomicBool::new(false));

        let capture = ActiveCapture {
            handle_id: handle.id(),
            forwarder: Self::spawn_forwarder(frames, uplink_tx, Arc::clone(&muted)),
            backend,
            muted,
        };

        // Another acquire may have won the device while we were starting
        let rejected = {
            let mut active = self
                .active
                .lock()
                .map_err(|_| AudioError::Device("device state poisoned".to_string()))?;
            if active.is_some() {
                Some(capture)
            } else {
                *active = Some(capture);
                None
            }
        };

        if let Some(mut capture) = rejected {
            warn!("Microphone was claimed while starting; discarding new capture");
            capture.forwarder.abort();
            if let Err(e) = capture.backend.stop().await {
                error!("Failed to stop discarded backend: {}", e);
            }
            return Err(AudioError::Device("microphone already in use".to_string()));
        }

        info!("Microphone acquired (handle {})", handle.id());
        Ok(handle)
    }

    fn set_muted(&self, handle: &MicrophoneHandle, muted: bool) -> Result<(), AudioError> {
        let active = self
            .active
            .lock()
            .map_err(|_| AudioError::Device("device state poisoned".to_string()))?;

        match active.as_ref() {
            Some(capture) if capture.handle_id == handle.id() => {
                let previous = capture.muted.swap(muted, Ordering::SeqCst);
                if previous != muted {
                    info!("Microphone {}", if muted { "muted" } else { "unmuted" });
                }
                Ok(())
            }
            _ => Err(AudioError::Device(format!(
                "handle {} does not hold the microphone",
                handle.id()
            ))),
        }
    }

    async fn release(&self, handle: &MicrophoneHandle) {
        let capture = match self.active.lock() {
            Ok(mut active) => match active.as_ref() {
                Some(capture) if capture.handle_id == handle.id() => active.take(),
                _ => None,
            },
            Err(_) => {
                error!("Device state poisoned; cannot release {}", handle.id());
                None
            }
        };

        let Some(mut capture) = capture else {
            debug!("Microphone handle {} already released", handle.id());
            return;
        };

        capture.forwarder.abort();
        if let Err(e) = capture.backend.stop().await {
            error!("Failed to stop {} backend: {}", capture.backend.name(), e);
        }

        info!("Microphone released (handle {})", handle.id());
    }
}
