//! Default input device capture through cpal
//!
//! cpal streams are not `Send`, so each capture lives on its own thread that
//! builds the stream, reports whether it started, and keeps it alive until
//! told to stop. Samples are converted in the device callback to the
//! configured PCM16 rate and channel count and handed over in fixed-length
//! frames.

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::device::AudioError;
use super::resample::{sample_to_i16, Resampler};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Groups converted samples into [`AudioFrame`]s of one buffer duration
struct FrameAssembler {
    resampler: Resampler,
    sample_rate: u32,
    frame_len: usize,
    frame_ms: u64,
    converted: Vec<f32>,
    pending: Vec<i16>,
    timestamp_ms: u64,
}

impl FrameAssembler {
    fn new(source_rate: u32, source_channels: u16, config: &AudioBackendConfig) -> Self {
        let per_channel = config.target_sample_rate as u64 * config.buffer_duration_ms / 1000;
        let frame_len = (per_channel as usize * config.target_channels.max(1) as usize).max(1);

        Self {
            resampler: Resampler::new(
                source_rate,
                source_channels,
                config.target_sample_rate,
                config.target_channels,
            ),
            sample_rate: config.target_sample_rate,
            frame_len,
            frame_ms: config.buffer_duration_ms,
            converted: Vec::new(),
            pending: Vec::with_capacity(frame_len),
            timestamp_ms: 0,
        }
    }

    /// Feed interleaved device samples; returns every frame completed by them
    fn push(&mut self, samples: impl IntoIterator<Item = f32>) -> Vec<AudioFrame> {
        self.converted.clear();
        self.resampler.push_all(samples, &mut self.converted);

        let mut frames = Vec::new();
        for sample in self.converted.drain(..) {
            self.pending.push(sample_to_i16(sample));
            if self.pending.len() == self.frame_len {
                frames.push(AudioFrame {
                    samples: std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_len)),
                    sample_rate: self.sample_rate,
                    channels: self.resampler.target_channels(),
                    timestamp_ms: self.timestamp_ms,
                });
                self.timestamp_ms += self.frame_ms;
            }
        }
        frames
    }
}

/// Sort a platform failure into a refused permission or a device problem
fn classify_failure(detail: String) -> AudioError {
    let lower = detail.to_lowercase();
    let refused = ["permission", "denied", "not authorized", "unauthorized"]
        .iter()
        .any(|needle| lower.contains(needle));

    if refused {
        AudioError::PermissionDenied
    } else {
        AudioError::Device(detail)
    }
}

fn build_error(err: cpal::BuildStreamError) -> AudioError {
    match err {
        // The OS withholds the device from processes without microphone access
        cpal::BuildStreamError::DeviceNotAvailable => AudioError::PermissionDenied,
        cpal::BuildStreamError::BackendSpecific { err } => classify_failure(err.description),
        other => AudioError::Device(format!("failed to create input stream: {}", other)),
    }
}

fn play_error(err: cpal::PlayStreamError) -> AudioError {
    match err {
        cpal::PlayStreamError::DeviceNotAvailable => AudioError::PermissionDenied,
        cpal::PlayStreamError::BackendSpecific { err } => classify_failure(err.description),
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut assembler: FrameAssembler,
    frames: mpsc::Sender<AudioFrame>,
) -> Result<Stream, AudioError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let err_fn = |err| error!("Audio input stream error: {}", err);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in assembler.push(data.iter().map(|s| f32::from_sample(*s))) {
                    // Never block the audio thread; a full uplink drops frames
                    if frames.try_send(frame).is_err() {
                        break;
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(build_error)
}

fn open_input_stream(
    config: &AudioBackendConfig,
    frames: mpsc::Sender<AudioFrame>,
) -> Result<Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AudioError::Device("no audio input device found".to_string()))?;

    info!(
        "Using audio input device: {}",
        device.name().unwrap_or_else(|_| "unknown".to_string())
    );

    let supported = device
        .default_input_config()
        .map_err(|e| classify_failure(format!("no supported input configuration: {}", e)))?;

    info!(
        "Input config: {} Hz, {} channels, {:?}",
        supported.sample_rate().0,
        supported.channels(),
        supported.sample_format()
    );

    let sample_format = supported.sample_format();
    let stream_config: StreamConfig = supported.into();
    let assembler = FrameAssembler::new(stream_config.sample_rate.0, stream_config.channels, config);

    let stream = match sample_format {
        SampleFormat::I16 => build_input::<i16>(&device, &stream_config, assembler, frames),
        SampleFormat::U16 => build_input::<u16>(&device, &stream_config, assembler, frames),
        SampleFormat::F32 => build_input::<f32>(&device, &stream_config, assembler, frames),
        other => Err(AudioError::Device(format!(
            "unsupported input sample format {:?}",
            other
        ))),
    }?;

    stream.play().map_err(play_error)?;
    Ok(stream)
}

/// [`AudioBackend`] over the host's default input device
pub struct CpalBackend {
    config: AudioBackendConfig,
    capturing: Arc<AtomicBool>,
    /// Dropping the sender stops the capture thread
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CpalBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            capturing: Arc::new(AtomicBool::new(false)),
            stop: None,
            thread: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for CpalBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AudioError> {
        if self.capturing.load(Ordering::SeqCst) {
            return Err(AudioError::Device("microphone capture already started".to_string()));
        }

        let (frames_tx, frames_rx) = mpsc::channel(32);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let config = self.config.clone();
        let capturing = Arc::clone(&self.capturing);

        let thread = thread::Builder::new()
            .name("microphone-capture".to_string())
            .spawn(move || {
                let stream = match open_input_stream(&config, frames_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                capturing.store(true, Ordering::SeqCst);
                let _ = ready_tx.send(Ok(()));

                // Returns once stop() runs or the backend is dropped
                let _ = stop_rx.recv();
                drop(stream);
                capturing.store(false, Ordering::SeqCst);
                debug!("Microphone capture thread finished");
            })
            .map_err(|e| AudioError::Device(format!("failed to start capture thread: {}", e)))?;

        // Stored before waiting so a cancelled start still stops the thread
        self.stop = Some(stop_tx);
        self.thread = Some(thread);

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("Microphone capture started");
                Ok(frames_rx)
            }
            Ok(Err(e)) => {
                warn!("Microphone capture failed to start: {}", e);
                self.stop = None;
                self.thread = None;
                Err(e)
            }
            Err(_) => Err(AudioError::Device(
                "capture thread exited before reporting".to_string(),
            )),
        }
    }

    async fn stop(&mut self) -> Result<(), AudioError> {
        self.stop = None;
        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || thread.join())
                .await
                .map_err(|e| AudioError::Device(e.to_string()))?
                .map_err(|_| AudioError::Device("capture thread panicked".to_string()))?;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "cpal"
    }
}
