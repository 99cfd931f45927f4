//! Emotion classification over cepstral feature matrices.
//!
//! The pretrained network is opaque: anything implementing [`EmotionModel`]
//! ("given tensor, return probability vector") can back the [`Classifier`].

mod provider;

pub use provider::{OnnxEmotionModel, DEFAULT_MODEL_FILENAME};

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use ndarray::ArrayView4;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::features::FeatureMatrix;

/// Number of emotion categories the classifier distinguishes
pub const NUM_EMOTIONS: usize = 8;

/// Tolerance for treating model output as an already-normalized distribution
const DISTRIBUTION_TOLERANCE: f32 = 1e-3;

/// Errors that can occur during classification
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Model not found at path: {0}")]
    ModelNotFound(PathBuf),

    #[error("Failed to load model: {0}")]
    ModelLoadError(String),

    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("Invalid model output: {0}")]
    InvalidOutput(String),

    #[error("Feature not enabled: the ONNX classifier requires the 'onnx' feature")]
    FeatureNotEnabled,
}

/// Emotion label set. The order matches the classifier's output vector and
/// must not change independently of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral = 0,
    Calm = 1,
    Happy = 2,
    Sad = 3,
    Angry = 4,
    Fearful = 5,
    Disgust = 6,
    Surprised = 7,
}

impl Emotion {
    pub const ALL: [Emotion; NUM_EMOTIONS] = [
        Emotion::Neutral,
        Emotion::Calm,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Fearful,
        Emotion::Disgust,
        Emotion::Surprised,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Calm => "calm",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Fearful => "fearful",
            Emotion::Disgust => "disgust",
            Emotion::Surprised => "surprised",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown emotion: {}", s))
    }
}

/// Predicted label plus the full confidence vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: Emotion,
    /// Probabilities aligned index-for-index with [`Emotion::ALL`].
    /// Serialized as a `label -> confidence` map.
    #[serde(with = "confidence_map")]
    pub confidences: [f32; NUM_EMOTIONS],
}

/// (De)serialize the confidence array keyed by label name
mod confidence_map {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{Emotion, NUM_EMOTIONS};

    pub fn serialize<S: Serializer>(
        confidences: &[f32; NUM_EMOTIONS],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(NUM_EMOTIONS))?;
        for (emotion, confidence) in Emotion::ALL.iter().zip(confidences) {
            map.serialize_entry(emotion.as_str(), confidence)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[f32; NUM_EMOTIONS], D::Error> {
        let map = BTreeMap::<Emotion, f32>::deserialize(deserializer)?;
        let mut confidences = [0.0; NUM_EMOTIONS];
        for emotion in Emotion::ALL {
            confidences[emotion.index()] = *map
                .get(&emotion)
                .ok_or_else(|| D::Error::custom(format!("missing confidence for {}", emotion)))?;
        }
        Ok(confidences)
    }
}

impl ClassificationResult {
    /// Build from a probability vector, picking the first maximal entry
    pub fn from_probabilities(probabilities: &[f32]) -> Result<Self, ClassifierError> {
        let confidences: [f32; NUM_EMOTIONS] = probabilities.try_into().map_err(|_| {
            ClassifierError::InvalidOutput(format!(
                "expected {} values, got {}",
                NUM_EMOTIONS,
                probabilities.len()
            ))
        })?;

        let index = argmax_first(&confidences)
            .ok_or_else(|| ClassifierError::InvalidOutput("empty output".to_string()))?;
        let label = Emotion::from_index(index)
            .ok_or_else(|| ClassifierError::InvalidOutput(format!("label index {}", index)))?;

        Ok(Self { label, confidences })
    }

    pub fn confidence(&self, emotion: Emotion) -> f32 {
        self.confidences[emotion.index()]
    }

    /// Confidence of the predicted label
    pub fn top_confidence(&self) -> f32 {
        self.confidence(self.label)
    }

    /// (label, confidence) pairs in label order
    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f32)> + '_ {
        Emotion::ALL.iter().copied().zip(self.confidences.iter().copied())
    }
}

/// Index of the first maximal value. Ties go to the lowest index.
pub fn argmax_first(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, best_v)) if v <= best_v => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Accept a probability vector as-is, or softmax it when it looks like logits
fn to_distribution(output: &[f32]) -> Result<Vec<f32>, ClassifierError> {
    if output.len() != NUM_EMOTIONS {
        return Err(ClassifierError::InvalidOutput(format!(
            "expected {} values, got {}",
            NUM_EMOTIONS,
            output.len()
        )));
    }
    if output.iter().any(|v| !v.is_finite()) {
        return Err(ClassifierError::InvalidOutput(
            "non-finite confidence".to_string(),
        ));
    }

    let sum: f32 = output.iter().sum();
    let is_distribution =
        output.iter().all(|&v| v >= 0.0) && (sum - 1.0).abs() <= DISTRIBUTION_TOLERANCE;

    if is_distribution {
        Ok(output.to_vec())
    } else {
        debug!("Model output sums to {:.4}, applying softmax", sum);
        Ok(softmax(output))
    }
}

/// A pretrained model mapping a `[1, bands, frames, 1]` tensor to one score
/// per emotion. Implementations must be deterministic.
pub trait EmotionModel: Send + Sync {
    fn infer(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, ClassifierError>;

    /// Short human-readable identifier used in logs
    fn name(&self) -> &str;
}

/// Feature matrix in, classification out
pub struct Classifier {
    model: Box<dyn EmotionModel>,
}

impl Classifier {
    pub fn new(model: Box<dyn EmotionModel>) -> Self {
        Self { model }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn classify(&self, features: &FeatureMatrix) -> Result<ClassificationResult, ClassifierError> {
        let tensor = features.to_input_tensor();
        let output = self.model.infer(tensor.view())?;
        let probabilities = to_distribution(&output)?;
        let result = ClassificationResult::from_probabilities(&probabilities)?;

        debug!(
            "Classified as {} ({:.0}%) by {}",
            result.label,
            result.top_confidence() * 100.0,
            self.model.name()
        );

        Ok(result)
    }
}
