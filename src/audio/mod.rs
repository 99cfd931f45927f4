//! Audio loading: container decoding, downmixing and resampling.
//!
//! Every clip leaves this module as a mono `f32` waveform at the
//! classifier's sample rate (22,050 Hz), whatever the source looked like.

pub mod loader;
pub mod resampler;

pub use loader::{AudioFormat, AudioLoader, DecodeError};
pub use resampler::{resample, AudioResampler, TARGET_SAMPLE_RATE};

/// Decoded mono waveform
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioClip {
    /// Create a clip, rejecting empty waveforms and a zero sample rate
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self, DecodeError> {
        if sample_rate == 0 {
            return Err(DecodeError::InvalidSampleRate(sample_rate));
        }
        if samples.is_empty() {
            return Err(DecodeError::NoSamples);
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}
