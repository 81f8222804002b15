use super::device::AudioError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Little-endian PCM16 bytes, the layout the agent expects upstream
    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Frame from little-endian PCM16 bytes; a trailing odd byte is ignored
    pub fn from_pcm_bytes(bytes: &[u8], sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: bytes
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                .collect(),
            sample_rate,
            channels,
            timestamp_ms: 0,
        }
    }
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Buffer size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // 16kHz PCM for the agent
            target_channels: 1,        // Mono
            buffer_duration_ms: 100,   // 100ms buffers
        }
    }
}

impl From<&crate::config::AudioConfig> for AudioBackendConfig {
    fn from(config: &crate::config::AudioConfig) -> Self {
        Self {
            target_sample_rate: config.sample_rate,
            target_channels: config.channels,
            buffer_duration_ms: config.buffer_duration_ms,
        }
    }
}

/// Audio capture backend trait
///
/// A backend owns one physical (or synthetic) input. Starting it may prompt
/// the user for permission, so callers must not assume bounded latency.
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AudioError>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<(), AudioError>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Backend that emits silent frames at the configured buffer cadence.
///
/// Selected with `audio.backend = "silence"` on hosts without a capture
/// device so the agent still receives a well-formed upstream audio stream.
pub struct SilenceBackend {
    config: AudioBackendConfig,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl SilenceBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    fn samples_per_buffer(&self) -> usize {
        let per_channel =
            self.config.target_sample_rate as u64 * self.config.buffer_duration_ms / 1000;
        per_channel as usize * self.config.target_channels as usize
    }
}

#[async_trait::async_trait]
impl AudioBackend for SilenceBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AudioError> {
        if self.capturing.load(Ordering::SeqCst) {
            return Err(AudioError::Device("silence backend already started".to_string()));
        }

        let (tx, rx) = mpsc::channel(32);
        let samples = self.samples_per_buffer();
        let sample_rate = self.config.target_sample_rate;
        let channels = self.config.target_channels;
        let period = Duration::from_millis(self.config.buffer_duration_ms.max(1));
        let capturing = Arc::clone(&self.capturing);

        capturing.store(true, Ordering::SeqCst);
        info!("Silence backend started ({} samples per frame)", samples);

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut timestamp_ms = 0u64;

            while capturing.load(Ordering::SeqCst) {
                ticker.tick().await;

                let frame = AudioFrame {
                    samples: vec![0; samples],
                    sample_rate,
                    channels,
                    timestamp_ms,
                };

                if tx.send(frame).await.is_err() {
                    debug!("Silence frame receiver dropped");
                    break;
                }
                timestamp_ms += period.as_millis() as u64;
            }

            capturing.store(false, Ordering::SeqCst);
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), AudioError> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "silence"
    }
}

impl Drop for SilenceBackend {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
