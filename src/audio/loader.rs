use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use hound::{SampleFormat, WavReader};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::{debug, warn};

use super::resampler::{resample, TARGET_SAMPLE_RATE};
use super::AudioClip;

/// Errors that can occur while turning stored audio into a waveform
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Audio buffer is empty")]
    Empty,

    #[error("Unrecognized audio container")]
    UnknownFormat,

    #[error("Failed to read audio file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed {format} data: {message}")]
    Malformed { format: AudioFormat, message: String },

    #[error("Unsupported audio encoding: {0}")]
    Unsupported(String),

    #[error("Audio contains no samples")]
    NoSamples,

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Resampling failed: {0}")]
    Resample(String),
}

impl DecodeError {
    fn malformed(format: AudioFormat, err: impl fmt::Display) -> Self {
        DecodeError::Malformed {
            format,
            message: err.to_string(),
        }
    }
}

/// Container format of a stored clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    Wav,
    Flac,
    Ogg,
}

impl AudioFormat {
    /// Detect the container from its magic bytes
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            Some(Self::Wav)
        } else if bytes.starts_with(b"fLaC") {
            Some(Self::Flac)
        } else if bytes.starts_with(b"OggS") {
            Some(Self::Ogg)
        } else {
            None
        }
    }

    /// Map a file extension (without the dot, any case) to a format
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "wav" | "wave" => Some(Self::Wav),
            "flac" => Some(Self::Flac),
            "ogg" | "oga" => Some(Self::Ogg),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Flac => "flac",
            Self::Ogg => "ogg",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| format!("Unknown audio format: {}", s))
    }
}

/// Interleaved samples straight out of a container
struct DecodedAudio {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
}

/// Decodes stored clips into mono waveforms at a fixed sample rate
#[derive(Debug, Clone)]
pub struct AudioLoader {
    target_sample_rate: u32,
}

impl Default for AudioLoader {
    fn default() -> Self {
        Self {
            target_sample_rate: TARGET_SAMPLE_RATE,
        }
    }
}

impl AudioLoader {
    pub fn new(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Decode a byte buffer. When `format` is `None` the container is sniffed.
    pub fn load_bytes(&self, bytes: &[u8], format: Option<AudioFormat>) -> Result<AudioClip, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let format = format
            .or_else(|| AudioFormat::sniff(bytes))
            .ok_or(DecodeError::UnknownFormat)?;

        let decoded = match format {
            AudioFormat::Wav => decode_wav(bytes)?,
            AudioFormat::Flac | AudioFormat::Ogg => decode_symphonia(bytes, format)?,
        };

        debug!(
            "Decoded {} clip: {} Hz, {} channels, {} frames",
            format,
            decoded.sample_rate,
            decoded.channels,
            decoded.samples.len() / decoded.channels.max(1)
        );

        if decoded.sample_rate == 0 {
            return Err(DecodeError::InvalidSampleRate(0));
        }

        let mono = downmix(&decoded.samples, decoded.channels);
        if mono.is_empty() {
            return Err(DecodeError::NoSamples);
        }

        let samples = resample(&mono, decoded.sample_rate, self.target_sample_rate)?;
        AudioClip::new(samples, self.target_sample_rate)
    }

    /// Read and decode a file, taking the format from its extension and
    /// falling back to sniffing
    pub fn load_file(&self, path: &Path) -> Result<AudioClip, DecodeError> {
        let bytes = std::fs::read(path).map_err(|source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(AudioFormat::from_extension);

        self.load_bytes(&bytes, format)
    }
}

/// Average interleaved channels into a single channel
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => interleaved.to_vec(),
        n => interleaved
            .chunks_exact(n)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect(),
    }
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, DecodeError> {
    let mut reader =
        WavReader::new(Cursor::new(bytes)).map_err(|e| DecodeError::malformed(AudioFormat::Wav, e))?;
    let spec = reader.spec();

    if spec.channels == 0 {
        return Err(DecodeError::malformed(AudioFormat::Wav, "zero channels"));
    }

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(DecodeError::Unsupported(format!(
                    "{}-bit integer PCM",
                    spec.bits_per_sample
                )));
            }
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| DecodeError::malformed(AudioFormat::Wav, e))?
        }
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| DecodeError::malformed(AudioFormat::Wav, e))?,
    };

    Ok(DecodedAudio {
        samples,
        channels: spec.channels as usize,
        sample_rate: spec.sample_rate,
    })
}

fn decode_symphonia(bytes: &[u8], format: AudioFormat) -> Result<DecodedAudio, DecodeError> {
    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(format.extension());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::malformed(format, e))?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::malformed(format, "no audio track"))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

    let mut samples = Vec::new();
    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::malformed(format, e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable {} packet: {}", format, e);
                continue;
            }
            Err(e) => return Err(DecodeError::malformed(format, e)),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count();

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    Ok(DecodedAudio {
        samples,
        channels,
        sample_rate,
    })
}
