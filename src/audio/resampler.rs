use rubato::{FftFixedIn, Resampler};
use tracing::debug;

use super::DecodeError;

/// Sample rate expected by the feature extractor and classifier
pub const TARGET_SAMPLE_RATE: u32 = 22050;

/// Input chunk size fed to the FFT resampler
const CHUNK_FRAMES: usize = 1024;

/// Whole-clip resampler from a source rate to a target rate
pub struct AudioResampler {
    resampler: FftFixedIn<f32>,
    output_buffer: Vec<Vec<f32>>,
    source_rate: u32,
    target_rate: u32,
}

impl AudioResampler {
    /// Create a new mono resampler between two rates
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self, DecodeError> {
        if source_rate == 0 {
            return Err(DecodeError::InvalidSampleRate(source_rate));
        }
        if target_rate == 0 {
            return Err(DecodeError::InvalidSampleRate(target_rate));
        }

        debug!(
            "Creating resampler: {} Hz -> {} Hz (ratio: {:.4})",
            source_rate,
            target_rate,
            target_rate as f64 / source_rate as f64
        );

        let resampler = FftFixedIn::new(
            source_rate as usize,
            target_rate as usize,
            CHUNK_FRAMES,
            2, // sub_chunks for quality
            1,
        )
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

        let output_buffer = resampler.output_buffer_allocate(true);

        Ok(Self {
            resampler,
            output_buffer,
            source_rate,
            target_rate,
        })
    }

    /// Number of output samples a clip of `input_len` samples maps to
    pub fn expected_output_len(&self, input_len: usize) -> usize {
        let num = input_len as u64 * self.target_rate as u64;
        num.div_ceil(self.source_rate as u64) as usize
    }

    /// Resample a complete clip.
    ///
    /// The tail is flushed with partial chunks and the resampler's output
    /// delay is trimmed, so the result is aligned with the input and has
    /// exactly `expected_output_len(input.len())` samples.
    pub fn process_all(&mut self, input: &[f32]) -> Result<Vec<f32>, DecodeError> {
        self.resampler.reset();

        let expected = self.expected_output_len(input.len());
        let delay = self.resampler.output_delay();
        let wanted = delay + expected;
        let chunk_frames = self.resampler.input_frames_next();
        let mut output: Vec<f32> = Vec::with_capacity(wanted + self.output_buffer[0].len());

        let mut pos = 0;
        while input.len() - pos >= chunk_frames {
            let chunk: [&[f32]; 1] = [&input[pos..pos + chunk_frames]];
            let (_, written) = self
                .resampler
                .process_into_buffer(&chunk[..], &mut self.output_buffer, None)
                .map_err(|e| DecodeError::Resample(e.to_string()))?;
            output.extend_from_slice(&self.output_buffer[0][..written]);
            pos += chunk_frames;
        }

        let mut fed = pos;
        if pos < input.len() {
            let chunk: [&[f32]; 1] = [&input[pos..]];
            let (_, written) = self
                .resampler
                .process_partial_into_buffer(Some(&chunk[..]), &mut self.output_buffer, None)
                .map_err(|e| DecodeError::Resample(e.to_string()))?;
            output.extend_from_slice(&self.output_buffer[0][..written]);
            fed += chunk_frames;
        }

        // Output comes in whole FFT blocks of 2 * delay frames, so a call may
        // legitimately write nothing. Flush until the input side has covered
        // everything still owed plus one block.
        let owed = (wanted + 2 * delay + 2) as u64 * self.source_rate as u64;
        let flush_limit = owed.div_ceil(self.target_rate as u64) as usize + chunk_frames;
        while output.len() < wanted && fed < flush_limit {
            let (_, written) = self
                .resampler
                .process_partial_into_buffer(None::<&[&[f32]]>, &mut self.output_buffer, None)
                .map_err(|e| DecodeError::Resample(e.to_string()))?;
            output.extend_from_slice(&self.output_buffer[0][..written]);
            fed += chunk_frames;
        }

        if output.len() < wanted {
            return Err(DecodeError::Resample(format!(
                "flush produced {} of {} frames",
                output.len(),
                wanted
            )));
        }

        Ok(output[delay..wanted].to_vec())
    }
}

/// Resample `samples` from `source_rate` to `target_rate`, passing
/// same-rate input through untouched
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>, DecodeError> {
    if source_rate == target_rate {
        return Ok(samples.to_vec());
    }
    AudioResampler::new(source_rate, target_rate)?.process_all(samples)
}
