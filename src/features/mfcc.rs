//! Cepstral coefficients from a log-mel spectrogram.

use std::f64::consts::PI;

use ndarray::Array2;
use tracing::debug;

use super::config::FeatureConfig;
use super::mel::LogMelSpectrogram;
use super::{FeatureError, FeatureMatrix, N_MFCC};
use crate::audio::AudioClip;

/// Computes the fixed-shape cepstral matrix for a clip.
///
/// Pure and deterministic: the same waveform always yields the same matrix.
pub struct FeatureExtractor {
    mel: LogMelSpectrogram,
    /// Orthonormal DCT-II basis, shape (N_MFCC, n_mels)
    dct_basis: Array2<f32>,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Result<Self, FeatureError> {
        let dct_basis = dct_ii_ortho(N_MFCC, config.n_mels);
        let mel = LogMelSpectrogram::new(config)?;
        Ok(Self { mel, dct_basis })
    }

    pub fn config(&self) -> &FeatureConfig {
        self.mel.config()
    }

    /// Unpadded coefficients of shape (N_MFCC, 1 + len / hop_length)
    pub fn raw_coefficients(&self, samples: &[f32]) -> Result<Array2<f32>, FeatureError> {
        let log_mel = self.mel.compute(samples)?;
        let mfcc = self.dct_basis.dot(&log_mel);

        if let Some(((band, frame), _)) = mfcc.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(FeatureError::NonFinite { band, frame });
        }

        Ok(mfcc)
    }

    /// Extract the fixed-shape feature matrix for a clip
    pub fn extract(&self, clip: &AudioClip) -> Result<FeatureMatrix, FeatureError> {
        let expected = self.config().sample_rate;
        if clip.sample_rate() != expected {
            return Err(FeatureError::SampleRateMismatch {
                expected,
                actual: clip.sample_rate(),
            });
        }

        let raw = self.raw_coefficients(clip.samples())?;
        let matrix = FeatureMatrix::from_raw(raw.view())?;

        debug!(
            "Extracted features: {} natural frames ({})",
            matrix.natural_frames(),
            if matrix.is_padded() { "padded" } else { "truncated" }
        );

        Ok(matrix)
    }
}

/// DCT-II basis with orthonormal scaling, keeping the first `n_out` rows
fn dct_ii_ortho(n_out: usize, n_in: usize) -> Array2<f32> {
    let n = n_in as f64;
    Array2::from_shape_fn((n_out, n_in), |(k, i)| {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        (scale * (PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n)).cos()) as f32
    })
}
