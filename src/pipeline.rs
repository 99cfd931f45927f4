//! Inference pipeline: bytes → waveform → features → classification → trend.
//!
//! Each request walks `Received → Decoded → FeaturesExtracted → Classified →
//! Logged → Completed`, or stops early in `DecodeFailed`, `FeatureFailed` or
//! `ClassifyUnavailable`. A failed trend append still reaches `Logged`; the
//! caller gets the classification and the failure only shows up in the logs.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::audio::{AudioClip, AudioFormat, AudioLoader, DecodeError};
use crate::classifier::{
    ClassificationResult, Classifier, ClassifierError, EmotionModel, OnnxEmotionModel,
};
use crate::config::Config;
use crate::features::{FeatureConfig, FeatureError, FeatureExtractor};
use crate::trend::{CsvTrendStore, PersistenceError, SessionTrendTracker, Trend};

/// Progress of a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Decoded,
    FeaturesExtracted,
    Classified,
    Logged,
    Completed,
}

/// Terminal failure state of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureState {
    DecodeFailed,
    FeatureFailed,
    ClassifyUnavailable,
}

/// Errors surfaced by the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Cannot process this clip: {0}")]
    Decode(#[from] DecodeError),

    #[error("Could not extract features: {0}")]
    FeatureExtraction(#[from] FeatureError),

    #[error("Classification failed: {0}")]
    Classify(#[from] ClassifierError),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Session log unavailable: {0}")]
    Persistence(#[from] PersistenceError),
}

impl PipelineError {
    /// Which terminal state a per-request failure ended in
    pub fn failure_state(&self) -> Option<FailureState> {
        match self {
            PipelineError::Decode(_) => Some(FailureState::DecodeFailed),
            PipelineError::FeatureExtraction(_) => Some(FailureState::FeatureFailed),
            PipelineError::Classify(_) => Some(FailureState::ClassifyUnavailable),
            PipelineError::ModelUnavailable(_) | PipelineError::Persistence(_) => None,
        }
    }

    /// Startup errors leave the pipeline unable to serve any request
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::ModelUnavailable(_) | PipelineError::Persistence(_)
        )
    }

    /// Message suitable for an end user
    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::Decode(_) => {
                "Could not read this recording. Please try a different recording."
            }
            PipelineError::FeatureExtraction(_) => {
                "Could not extract audio features. Please try a different recording."
            }
            PipelineError::Classify(_) | PipelineError::ModelUnavailable(_) => {
                "The emotion service is unavailable."
            }
            PipelineError::Persistence(_) => "The session log is unavailable.",
        }
    }
}

/// Outcome of a successful request
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub request_id: Uuid,
    #[serde(flatten)]
    pub result: ClassificationResult,
    /// False when the trend append failed
    pub logged: bool,
}

/// Owns the long-lived resources (model, session log) and serves requests
pub struct InferencePipeline {
    loader: AudioLoader,
    extractor: FeatureExtractor,
    classifier: Classifier,
    tracker: SessionTrendTracker,
}

impl InferencePipeline {
    pub fn new(
        model: Box<dyn EmotionModel>,
        tracker: SessionTrendTracker,
        features: FeatureConfig,
    ) -> Result<Self, PipelineError> {
        let loader = AudioLoader::default();
        let extractor = FeatureExtractor::new(features)?;
        let classifier = Classifier::new(model);

        info!(
            "Inference pipeline ready (model: {}, {} prior trend entries)",
            classifier.model_name(),
            tracker.len()
        );

        Ok(Self {
            loader,
            extractor,
            classifier,
            tracker,
        })
    }

    /// Load the ONNX model and open the CSV session log named by `config`
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let model_path = config
            .get_model_path()
            .map_err(|e| PipelineError::ModelUnavailable(e.to_string()))?;

        info!("Loading emotion model from {:?}", model_path);
        let model = OnnxEmotionModel::load(&model_path, config.n_threads)
            .map_err(|e| PipelineError::ModelUnavailable(e.to_string()))?;

        let log_path = config.get_trend_log_path().map_err(|e| {
            PersistenceError::Unavailable(format!("cannot resolve session log path: {}", e))
        })?;
        let tracker = SessionTrendTracker::open(CsvTrendStore::open(log_path)?)?;

        Self::new(Box::new(model), tracker, config.features.clone())
    }

    /// Classify a clip held in memory. `format` is sniffed when `None`.
    pub fn classify(
        &self,
        bytes: &[u8],
        format: Option<AudioFormat>,
    ) -> Result<Prediction, PipelineError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("classify", %request_id);
        let _enter = span.enter();

        debug!(stage = ?Stage::Received, bytes = bytes.len(), "Request received");
        let clip = self
            .loader
            .load_bytes(bytes, format)
            .map_err(|e| self.fail(e.into()))?;

        self.run(request_id, clip)
    }

    /// Classify a clip stored on disk
    pub fn classify_file(&self, path: &Path) -> Result<Prediction, PipelineError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("classify", %request_id);
        let _enter = span.enter();

        debug!(stage = ?Stage::Received, path = ?path, "Request received");
        let clip = self
            .loader
            .load_file(path)
            .map_err(|e| self.fail(e.into()))?;

        self.run(request_id, clip)
    }

    /// Everything recorded in the session so far, oldest first
    pub fn trend(&self) -> Trend {
        self.tracker.trend()
    }

    pub fn tracker(&self) -> &SessionTrendTracker {
        &self.tracker
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    fn run(&self, request_id: Uuid, clip: AudioClip) -> Result<Prediction, PipelineError> {
        debug!(
            stage = ?Stage::Decoded,
            samples = clip.len(),
            "Decoded {:.2}s clip",
            clip.duration_secs()
        );

        let features = self
            .extractor
            .extract(&clip)
            .map_err(|e| self.fail(e.into()))?;
        drop(clip);
        debug!(stage = ?Stage::FeaturesExtracted, natural_frames = features.natural_frames());

        let result = self
            .classifier
            .classify(&features)
            .map_err(|e| self.fail(e.into()))?;
        debug!(stage = ?Stage::Classified, label = %result.label);

        let logged = match self.tracker.record(result.label) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to append to session log: {}", e);
                false
            }
        };
        debug!(stage = ?Stage::Logged, logged);

        info!(
            "Predicted {} ({:.0}%)",
            result.label,
            result.top_confidence() * 100.0
        );
        debug!(stage = ?Stage::Completed);

        Ok(Prediction {
            request_id,
            result,
            logged,
        })
    }

    fn fail(&self, error: PipelineError) -> PipelineError {
        warn!(state = ?error.failure_state(), "Request failed: {}", error);
        error
    }
}
