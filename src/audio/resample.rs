//! Sample format, channel and rate conversion between devices and the agent

/// Convert a float sample to 16-bit PCM, clamping out-of-range input
pub fn sample_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

pub fn i16_to_sample(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

/// Streaming converter for interleaved float audio.
///
/// Input frames are mixed down to mono, then sample-and-hold resampled and
/// fanned out to the target channel count. State carries across calls so a
/// stream can be fed in arbitrary slices.
#[derive(Debug, Clone)]
pub struct Resampler {
    source_rate: u64,
    source_channels: u16,
    target_rate: u64,
    target_channels: u16,
    phase: u64,
    mix: f32,
    mixed: u16,
}

impl Resampler {
    pub fn new(source_rate: u32, source_channels: u16, target_rate: u32, target_channels: u16) -> Self {
        Self {
            source_rate: source_rate.max(1) as u64,
            source_channels: source_channels.max(1),
            target_rate: target_rate.max(1) as u64,
            target_channels: target_channels.max(1),
            phase: 0,
            mix: 0.0,
            mixed: 0,
        }
    }

    pub fn target_channels(&self) -> u16 {
        self.target_channels
    }

    /// Feed one interleaved input sample; converted samples go to `out`
    pub fn push(&mut self, sample: f32, out: &mut Vec<f32>) {
        self.mix += sample;
        self.mixed += 1;
        if self.mixed < self.source_channels {
            return;
        }

        let mono = self.mix / self.source_channels as f32;
        self.mix = 0.0;
        self.mixed = 0;

        self.phase += self.target_rate;
        while self.phase >= self.source_rate {
            self.phase -= self.source_rate;
            out.extend(std::iter::repeat(mono).take(self.target_channels as usize));
        }
    }

    pub fn push_all(&mut self, samples: impl IntoIterator<Item = f32>, out: &mut Vec<f32>) {
        for sample in samples {
            self.push(sample, out);
        }
    }
}
