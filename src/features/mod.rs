//! Acoustic feature extraction.
//!
//! Converts a mono waveform into the fixed 40×174 cepstral matrix the
//! classifier was trained on:
//! 1. Log-mel power spectrogram (`mel`)
//! 2. Orthonormal DCT-II down to 40 coefficients (`mfcc`)
//! 3. Zero-padding or truncation to exactly 174 frames (`fit_to_frames`)

pub mod config;
pub mod mel;
pub mod mfcc;

pub use config::FeatureConfig;
pub use mel::LogMelSpectrogram;
pub use mfcc::FeatureExtractor;

use ndarray::{s, Array2, Array4, ArrayView2};
use thiserror::Error;

/// Number of cepstral bands per frame
pub const N_MFCC: usize = 40;

/// Number of time frames the classifier accepts
pub const N_FRAMES: usize = 174;

/// Errors that can occur during feature extraction
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Empty audio input")]
    EmptyInput,

    #[error("Sample rate mismatch: clip is {actual} Hz, extractor expects {expected} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    #[error("Spectral transform failed: {0}")]
    Transform(String),

    #[error("Non-finite coefficient at band {band}, frame {frame}")]
    NonFinite { band: usize, frame: usize },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Normalize a (bands, frames) matrix to exactly `frames` columns.
///
/// Shorter inputs are right-padded with zero frames; longer inputs keep
/// their first `frames` columns and lose the tail.
pub fn fit_to_frames(raw: ArrayView2<f32>, frames: usize) -> Array2<f32> {
    let (bands, raw_frames) = raw.dim();

    if raw_frames < frames {
        let mut padded = Array2::<f32>::zeros((bands, frames));
        padded.slice_mut(s![.., ..raw_frames]).assign(&raw);
        padded
    } else {
        raw.slice(s![.., ..frames]).to_owned()
    }
}

/// Fixed-shape cepstral feature matrix, `N_MFCC` bands by `N_FRAMES` frames
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    data: Array2<f32>,
    natural_frames: usize,
}

impl FeatureMatrix {
    /// Build from an unpadded (bands, frames) coefficient matrix
    pub fn from_raw(raw: ArrayView2<f32>) -> Result<Self, FeatureError> {
        let (bands, natural_frames) = raw.dim();
        if bands != N_MFCC {
            return Err(FeatureError::Transform(format!(
                "expected {} bands, got {}",
                N_MFCC, bands
            )));
        }
        Ok(Self {
            data: fit_to_frames(raw, N_FRAMES),
            natural_frames,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Frame count of the clip before padding or truncation
    pub fn natural_frames(&self) -> usize {
        self.natural_frames
    }

    pub fn is_padded(&self) -> bool {
        self.natural_frames < N_FRAMES
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }

    pub fn into_inner(self) -> Array2<f32> {
        self.data
    }

    /// Single-channel image batch `[1, bands, frames, 1]` for the CNN
    pub fn to_input_tensor(&self) -> Array4<f32> {
        self.data
            .view()
            .insert_axis(ndarray::Axis(0))
            .insert_axis(ndarray::Axis(3))
            .to_owned()
    }
}
