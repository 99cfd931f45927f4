//! Log-mel power spectrogram.
//!
//! Centered, Hann-windowed short-time FFT, Slaney mel filterbank with area
//! normalization, then power to decibels with a dynamic range floor.

use std::f64::consts::PI;
use std::sync::Arc;

use ndarray::Array2;
use realfft::{RealFftPlanner, RealToComplex};

use super::config::FeatureConfig;
use super::FeatureError;

/// Log-mel spectrogram generator with pre-computed filterbank and FFT plan
pub struct LogMelSpectrogram {
    config: FeatureConfig,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    /// Shape: (n_mels, n_fft / 2 + 1)
    mel_filterbank: Array2<f32>,
}

impl LogMelSpectrogram {
    pub fn new(config: FeatureConfig) -> Result<Self, FeatureError> {
        config.validate()?;

        // Periodic Hann window
        let window: Vec<f32> = (0..config.n_fft)
            .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / config.n_fft as f64).cos()) as f32)
            .collect();

        let mel_filterbank = create_mel_filterbank(
            config.n_mels,
            config.n_fft,
            config.sample_rate as f64,
            config.fmin as f64,
            config.fmax_or_nyquist() as f64,
        );

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.n_fft);

        Ok(Self {
            config,
            fft,
            window,
            mel_filterbank,
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Power spectrogram of shape (n_fft / 2 + 1, frames)
    pub fn power_spectrogram(&self, audio: &[f32]) -> Result<Array2<f32>, FeatureError> {
        if audio.is_empty() {
            return Err(FeatureError::EmptyInput);
        }

        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let n_bins = n_fft / 2 + 1;

        // Center frames by zero-padding half a window on both sides
        let pad = n_fft / 2;
        let mut padded = vec![0.0f32; audio.len() + 2 * pad];
        padded[pad..pad + audio.len()].copy_from_slice(audio);

        let n_frames = 1 + (padded.len() - n_fft) / hop;
        let mut power = Array2::<f32>::zeros((n_bins, n_frames));

        let mut fft_input = self.fft.make_input_vec();
        let mut fft_output = self.fft.make_output_vec();

        for frame_idx in 0..n_frames {
            let start = frame_idx * hop;
            for (i, (dst, &sample)) in fft_input
                .iter_mut()
                .zip(&padded[start..start + n_fft])
                .enumerate()
            {
                *dst = sample * self.window[i];
            }

            self.fft
                .process(&mut fft_input, &mut fft_output)
                .map_err(|e| FeatureError::Transform(format!("FFT failed: {}", e)))?;

            for (bin, c) in fft_output.iter().enumerate() {
                power[[bin, frame_idx]] = c.re * c.re + c.im * c.im;
            }
        }

        Ok(power)
    }

    /// Log-mel spectrogram in dB, shape (n_mels, frames)
    pub fn compute(&self, audio: &[f32]) -> Result<Array2<f32>, FeatureError> {
        let power = self.power_spectrogram(audio)?;
        let mel = self.mel_filterbank.dot(&power);
        Ok(power_to_db(mel, self.config.amin, self.config.top_db))
    }
}

/// `10 * log10(max(amin, S))`, clamped to `top_db` below the peak
fn power_to_db(mut mel: Array2<f32>, amin: f32, top_db: Option<f32>) -> Array2<f32> {
    mel.mapv_inplace(|p| 10.0 * p.max(amin).log10());

    if let Some(top_db) = top_db {
        let peak = mel.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let floor = peak - top_db;
        mel.mapv_inplace(|db| db.max(floor));
    }

    mel
}

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

/// Convert frequency to the Slaney mel scale (linear below 1 kHz, log above)
fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

/// Convert Slaney mel back to frequency
fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Create a Slaney-normalized triangular mel filterbank
///
/// # Returns
/// Matrix of shape (n_mels, n_fft / 2 + 1)
fn create_mel_filterbank(
    n_mels: usize,
    n_fft: usize,
    sample_rate: f64,
    fmin: f64,
    fmax: f64,
) -> Array2<f32> {
    let n_bins = n_fft / 2 + 1;
    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * sample_rate / n_fft as f64)
        .collect();

    // n_mels + 2 points equally spaced on the mel scale, back in Hz
    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);
    let hz_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filterbank = Array2::<f32>::zeros((n_mels, n_bins));

    for m in 0..n_mels {
        let left = hz_points[m];
        let center = hz_points[m + 1];
        let right = hz_points[m + 2];
        let enorm = 2.0 / (right - left);

        for (bin, &freq) in fft_freqs.iter().enumerate() {
            let rising = (freq - left) / (center - left);
            let falling = (right - freq) / (right - center);
            let weight = rising.min(falling).max(0.0);
            filterbank[[m, bin]] = (weight * enorm) as f32;
        }
    }

    filterbank
}
