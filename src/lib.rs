//! Speech emotion classification.
//!
//! A clip is decoded to a mono 22,050 Hz waveform, summarized as a 40×174
//! cepstral matrix, scored by a pretrained classifier over eight emotions,
//! and appended to the session trend.

pub mod audio;
pub mod classifier;
pub mod config;
pub mod features;
pub mod pipeline;
pub mod trend;

#[cfg(test)]
mod pipeline_tests;

pub use audio::{AudioClip, AudioFormat, AudioLoader, DecodeError};
pub use classifier::{ClassificationResult, Classifier, ClassifierError, Emotion, EmotionModel};
pub use config::Config;
pub use features::{FeatureConfig, FeatureError, FeatureExtractor, FeatureMatrix};
pub use pipeline::{FailureState, InferencePipeline, PipelineError, Prediction, Stage};
pub use trend::{PersistenceError, SessionLogEntry, SessionTrendTracker, Trend};
