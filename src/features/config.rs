//! Configuration for the cepstral feature transform.

use serde::{Deserialize, Serialize};

use super::{FeatureError, N_MFCC};
use crate::audio::TARGET_SAMPLE_RATE;

/// Window and hop the classifier was trained with. Together with the
/// sample rate they fix how many seconds `N_FRAMES` covers.
pub const N_FFT: usize = 2048;
pub const HOP_LENGTH: usize = 512;

/// Short-time spectral parameters.
///
/// Defaults follow the reference library behaviour the classifier was
/// trained against: 2048-sample Hann window, 512-sample hop, centered
/// frames, 128 Slaney mel bands over 0 Hz to Nyquist and an 80 dB floor.
/// At 22,050 Hz that gives `1 + len / 512` frames, so 174 frames cover
/// roughly 4.04 seconds of audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Sample rate of input audio
    pub sample_rate: u32,

    /// FFT size, also the analysis window length
    pub n_fft: usize,

    /// Hop length between frames (in samples)
    pub hop_length: usize,

    /// Number of mel frequency bands
    pub n_mels: usize,

    /// Minimum frequency for mel filterbank (Hz)
    pub fmin: f32,

    /// Maximum frequency for mel filterbank (Hz), Nyquist when unset
    pub fmax: Option<f32>,

    /// Floor applied to mel power before the log
    pub amin: f32,

    /// Dynamic range kept below the loudest mel bin, in dB
    pub top_db: Option<f32>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: TARGET_SAMPLE_RATE,
            n_fft: N_FFT,
            hop_length: HOP_LENGTH, // ~23ms at 22.05kHz
            n_mels: 128,
            fmin: 0.0,
            fmax: None,
            amin: 1e-10,
            top_db: Some(80.0),
        }
    }
}

impl FeatureConfig {
    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    pub fn fmax_or_nyquist(&self) -> f32 {
        self.fmax.unwrap_or_else(|| self.nyquist())
    }

    /// Number of frames a clip of `len` samples produces before padding
    pub fn frame_count(&self, len: usize) -> usize {
        1 + len / self.hop_length
    }

    /// Check the parameters. Rate, window and hop are fixed by the trained
    /// model; only the mel and dB settings may be tuned.
    pub fn validate(&self) -> Result<(), FeatureError> {
        if self.sample_rate != TARGET_SAMPLE_RATE {
            return Err(FeatureError::Config(format!(
                "sample_rate must be {} Hz, got {}",
                TARGET_SAMPLE_RATE, self.sample_rate
            )));
        }
        if self.n_fft != N_FFT || self.hop_length != HOP_LENGTH {
            return Err(FeatureError::Config(format!(
                "n_fft/hop_length must be {}/{}, got {}/{}",
                N_FFT, HOP_LENGTH, self.n_fft, self.hop_length
            )));
        }
        if self.n_mels < N_MFCC {
            return Err(FeatureError::Config(format!(
                "n_mels ({}) must be at least the number of coefficients ({})",
                self.n_mels, N_MFCC
            )));
        }
        let fmax = self.fmax_or_nyquist();
        if self.fmin < 0.0 || fmax <= self.fmin || fmax > self.nyquist() {
            return Err(FeatureError::Config(format!(
                "invalid mel range {}..{} Hz",
                self.fmin, fmax
            )));
        }
        if self.amin <= 0.0 {
            return Err(FeatureError::Config("amin must be positive".into()));
        }
        if matches!(self.top_db, Some(db) if db < 0.0) {
            return Err(FeatureError::Config("top_db must be non-negative".into()));
        }
        Ok(())
    }
}
