//! Emotion classifier backed by an ONNX export of the pretrained CNN.
//!
//! The network takes a `[batch, 40, 174, 1]` float tensor and returns one
//! softmax score per emotion.

use std::path::{Path, PathBuf};
#[cfg(feature = "onnx")]
use std::sync::Mutex;

use ndarray::ArrayView4;
#[cfg(feature = "onnx")]
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};

use super::{ClassifierError, EmotionModel};

/// File name of the model inside the models directory
pub const DEFAULT_MODEL_FILENAME: &str = "cnn_emotion_model.onnx";

/// Reject missing or empty model files before handing them to the runtime
fn validate_model_file(model_path: &Path) -> Result<(), ClassifierError> {
    if !model_path.exists() {
        return Err(ClassifierError::ModelNotFound(model_path.to_path_buf()));
    }

    let metadata = std::fs::metadata(model_path)
        .map_err(|e| ClassifierError::ModelLoadError(e.to_string()))?;
    if !metadata.is_file() {
        return Err(ClassifierError::ModelLoadError(format!(
            "{:?} is not a file",
            model_path
        )));
    }
    if metadata.len() == 0 {
        return Err(ClassifierError::ModelLoadError(format!(
            "{:?} is empty",
            model_path
        )));
    }
    Ok(())
}

/// ONNX Runtime emotion classifier
#[cfg(feature = "onnx")]
pub struct OnnxEmotionModel {
    session: Mutex<Session>,
    model_path: PathBuf,
    name: String,
}

#[cfg(feature = "onnx")]
impl OnnxEmotionModel {
    /// Load the model once; failure here means the pipeline cannot serve
    pub fn load(model_path: &Path, n_threads: usize) -> Result<Self, ClassifierError> {
        validate_model_file(model_path)?;

        let session = Session::builder()
            .map_err(|e: ort::Error| ClassifierError::ModelLoadError(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e: ort::Error| ClassifierError::ModelLoadError(e.to_string()))?
            .with_intra_threads(n_threads.max(1))
            .map_err(|e: ort::Error| ClassifierError::ModelLoadError(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e: ort::Error| ClassifierError::ModelLoadError(e.to_string()))?;

        tracing::info!("Emotion classifier initialized with model: {:?}", model_path);

        let name = model_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_MODEL_FILENAME.to_string());

        Ok(Self {
            session: Mutex::new(session),
            model_path: model_path.to_path_buf(),
            name,
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

#[cfg(feature = "onnx")]
impl EmotionModel for OnnxEmotionModel {
    fn infer(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, ClassifierError> {
        let (batch, bands, frames, channels) = input.dim();
        let input_shape = [batch, bands, frames, channels];
        let input_data: Vec<f32> = input.iter().copied().collect();

        let input_tensor = Value::from_array((input_shape, input_data))
            .map_err(|e: ort::Error| ClassifierError::InferenceError(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ClassifierError::InferenceError("Session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e: ort::Error| ClassifierError::InferenceError(e.to_string()))?;

        // Output shape is [batch, 8]
        let output = outputs
            .iter()
            .next()
            .ok_or_else(|| ClassifierError::InferenceError("No output from model".to_string()))?;

        let output_tensor = output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e: ort::Error| ClassifierError::InferenceError(e.to_string()))?;

        let values: Vec<f32> = output_tensor.1.iter().copied().collect();

        Ok(values)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// Stub implementation when feature is not enabled
#[cfg(not(feature = "onnx"))]
pub struct OnnxEmotionModel {
    model_path: PathBuf,
}

#[cfg(not(feature = "onnx"))]
impl OnnxEmotionModel {
    pub fn load(model_path: &Path, _n_threads: usize) -> Result<Self, ClassifierError> {
        validate_model_file(model_path)?;
        Err(ClassifierError::FeatureNotEnabled)
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

#[cfg(not(feature = "onnx"))]
impl EmotionModel for OnnxEmotionModel {
    fn infer(&self, _input: ArrayView4<'_, f32>) -> Result<Vec<f32>, ClassifierError> {
        Err(ClassifierError::FeatureNotEnabled)
    }

    fn name(&self) -> &str {
        DEFAULT_MODEL_FILENAME
    }
}
