use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::classifier::DEFAULT_MODEL_FILENAME;
use crate::features::FeatureConfig;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: u32,

    // Model path
    pub model_path: Option<PathBuf>,

    /// Number of threads for ONNX inference
    pub n_threads: usize,

    // Session log path
    pub trend_log_path: Option<PathBuf>,

    // Spectral transform tuning
    pub features: FeatureConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: 1,
            model_path: None,
            n_threads: 1,
            trend_log_path: None,
            features: FeatureConfig::default(),
        }
    }
}

impl Config {
    /// Load config from file, or create default
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .context("Failed to read config file")?;
            serde_json::from_str(&content)
                .context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(path, content)
            .context("Failed to write config file")
    }

    /// Get the default config directory
    pub fn default_config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .context("Failed to get home directory")?;
        Ok(home.join(".speech-emotion"))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.json"))
    }

    /// Get the default models directory
    pub fn default_models_dir() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("models"))
    }

    /// Get the model file path
    pub fn get_model_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.model_path {
            Ok(path.clone())
        } else {
            Ok(Self::default_models_dir()?.join(DEFAULT_MODEL_FILENAME))
        }
    }

    /// Get the session log path
    pub fn get_trend_log_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.trend_log_path {
            Ok(path.clone())
        } else {
            Ok(Self::default_config_dir()?
                .join("logs")
                .join("session_emotions.csv"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.schema_version, 1);
        assert_eq!(config.n_threads, 1);
        assert_eq!(config.features, FeatureConfig::default());
    }

    #[test]
    fn test_explicit_paths_win() {
        let config = Config {
            model_path: Some(PathBuf::from("/models/custom.onnx")),
            trend_log_path: Some(PathBuf::from("/tmp/trend.csv")),
            ..Default::default()
        };
        assert_eq!(config.get_model_path().unwrap(), PathBuf::from("/models/custom.onnx"));
        assert_eq!(config.get_trend_log_path().unwrap(), PathBuf::from("/tmp/trend.csv"));
    }

    #[test]
    fn test_default_model_filename() {
        let config = Config::default();
        if let Ok(path) = config.get_model_path() {
            assert!(path.ends_with("models/cnn_emotion_model.onnx"));
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.n_threads = 4;
        config.features.top_db = Some(60.0);
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load(Path::new("/nonexistent/config.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
