//! Playback of the agent's voice
//!
//! The conversation transport decodes agent audio into [`AudioFrame`]s and
//! hands them to an [`AudioPlayback`] sink. [`SpeakerPlayback`] plays them on
//! the default output device; the queue is cleared when the agent is
//! interrupted so stale speech is not played over the candidate.

use super::backend::AudioFrame;
use super::device::AudioError;
use super::resample::{i16_to_sample, Resampler};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::collections::VecDeque;
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use tracing::{debug, error, info, warn};

/// Where decoded agent audio goes
pub trait AudioPlayback: Send + Sync {
    /// Queue a frame behind everything already queued. Must not block.
    fn play(&self, frame: AudioFrame);

    /// Drop everything queued but not yet played
    fn interrupt(&self);
}

/// Samples waiting for the output callback, already in the device format
struct OutputQueue {
    samples: VecDeque<f32>,
    resampler: Option<(u32, u16, Resampler)>,
    device_rate: u32,
    device_channels: u16,
}

impl OutputQueue {
    fn new(device_rate: u32, device_channels: u16) -> Self {
        Self {
            samples: VecDeque::new(),
            resampler: None,
            device_rate,
            device_channels,
        }
    }

    fn enqueue(&mut self, frame: &AudioFrame) {
        // Keep the resampler while the agent's format stays the same
        let reuse = matches!(
            &self.resampler,
            Some((rate, channels, _)) if *rate == frame.sample_rate && *channels == frame.channels
        );
        if !reuse {
            self.resampler = Some((
                frame.sample_rate,
                frame.channels,
                Resampler::new(
                    frame.sample_rate,
                    frame.channels,
                    self.device_rate,
                    self.device_channels,
                ),
            ));
        }

        if let Some((_, _, resampler)) = self.resampler.as_mut() {
            let mut converted = Vec::with_capacity(frame.samples.len() * 3);
            resampler.push_all(frame.samples.iter().map(|s| i16_to_sample(*s)), &mut converted);
            self.samples.extend(converted);
        }
    }

    fn clear(&mut self) {
        self.samples.clear();
    }

    /// Next device sample, silence when nothing is queued
    fn next_sample(&mut self) -> f32 {
        self.samples.pop_front().unwrap_or(0.0)
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    queue: Arc<Mutex<OutputQueue>>,
) -> Result<Stream, AudioError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let err_fn = |err| error!("Audio output stream error: {}", err);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut queue = match queue.lock() {
                    Ok(queue) => queue,
                    Err(poisoned) => poisoned.into_inner(),
                };
                for sample in data.iter_mut() {
                    *sample = T::from_sample(queue.next_sample());
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::Device(format!("failed to create output stream: {}", e)))
}

fn open_output_stream() -> Result<(Stream, Arc<Mutex<OutputQueue>>), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::Device("no audio output device found".to_string()))?;

    info!(
        "Using audio output device: {}",
        device.name().unwrap_or_else(|_| "unknown".to_string())
    );

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::Device(format!("no supported output configuration: {}", e)))?;

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let queue = Arc::new(Mutex::new(OutputQueue::new(
        config.sample_rate.0,
        config.channels,
    )));

    let stream = match sample_format {
        SampleFormat::I16 => build_output::<i16>(&device, &config, Arc::clone(&queue)),
        SampleFormat::U16 => build_output::<u16>(&device, &config, Arc::clone(&queue)),
        SampleFormat::F32 => build_output::<f32>(&device, &config, Arc::clone(&queue)),
        other => Err(AudioError::Device(format!(
            "unsupported output sample format {:?}",
            other
        ))),
    }?;

    stream
        .play()
        .map_err(|e| AudioError::Device(format!("failed to start output stream: {}", e)))?;

    Ok((stream, queue))
}

/// [`AudioPlayback`] on the host's default output device
pub struct SpeakerPlayback {
    queue: Arc<Mutex<OutputQueue>>,
    /// Dropping the sender stops the output thread
    _stop: Mutex<std_mpsc::Sender<()>>,
}

impl SpeakerPlayback {
    /// Open the default output device and start its stream
    pub fn open() -> Result<Self, AudioError> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        thread::Builder::new()
            .name("speaker-playback".to_string())
            .spawn(move || {
                let stream = match open_output_stream() {
                    Ok((stream, queue)) => {
                        let _ = ready_tx.send(Ok(queue));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = stop_rx.recv();
                drop(stream);
                debug!("Speaker playback thread finished");
            })
            .map_err(|e| AudioError::Device(format!("failed to start playback thread: {}", e)))?;

        let queue = ready_rx
            .recv()
            .map_err(|_| AudioError::Device("playback thread exited before reporting".to_string()))??;

        info!("Speaker playback ready");
        Ok(Self {
            queue,
            _stop: Mutex::new(stop_tx),
        })
    }

    fn with_queue(&self, f: impl FnOnce(&mut OutputQueue)) {
        match self.queue.lock() {
            Ok(mut queue) => f(&mut queue),
            Err(_) => warn!("Playback queue poisoned; dropping audio"),
        }
    }
}

impl AudioPlayback for SpeakerPlayback {
    fn play(&self, frame: AudioFrame) {
        self.with_queue(|queue| queue.enqueue(&frame));
    }

    fn interrupt(&self) {
        debug!("Agent interrupted; clearing playback queue");
        self.with_queue(OutputQueue::clear);
    }
}
