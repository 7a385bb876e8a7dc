use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::model::TreeParams;
use crate::trainer::SplitConfig;

pub const DEFAULT_PATH: &str = "config.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub models: ModelConfig,
    pub storage: StorageConfig,
    pub capture: CaptureConfig,
    pub training: TrainingConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub mirror: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub face_mesh: String,
    pub face_detection: String,
    pub detection_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub dataset_file: String,
    pub model_file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// 0 waits forever for a face.
    pub stall_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub test_ratio: f64,
    pub seed: u64,
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub show_window: bool,
    pub show_mesh: bool,
    pub mesh_dot_size: u32,
    pub mesh_color_hex: String,
    pub font_family: String,
    pub font_size_pt: u32,
    pub jpeg_quality: u8,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
            mirror: true,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            face_mesh: "face_mesh.onnx".to_string(),
            face_detection: "face_detection.onnx".to_string(),
            detection_threshold: 0.7,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: ".".to_string(),
            dataset_file: "facial_expressions.csv".to_string(),
            model_file: "expression_model.bin".to_string(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { stall_timeout_secs: 30 }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let split = SplitConfig::default();
        Self {
            test_ratio: split.test_ratio,
            seed: split.seed,
            max_depth: None,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            show_window: true,
            show_mesh: true,
            mesh_dot_size: 2,
            mesh_color_hex: "#0A6E50".to_string(),
            font_family: "Arial".to_string(),
            font_size_pt: 24,
            jpeg_quality: 80,
        }
    }
}

impl CaptureConfig {
    pub fn stall_timeout(&self) -> Option<Duration> {
        (self.stall_timeout_secs > 0).then(|| Duration::from_secs(self.stall_timeout_secs))
    }
}

impl TrainingConfig {
    pub fn split(&self) -> SplitConfig {
        let defaults = SplitConfig::default();
        let test_ratio = if self.test_ratio > 0.0 && self.test_ratio < 1.0 {
            self.test_ratio
        } else {
            warn!(test_ratio = self.test_ratio, "test_ratio must be in (0, 1); using {}", defaults.test_ratio);
            defaults.test_ratio
        };
        SplitConfig {
            test_ratio,
            seed: self.seed,
        }
    }

    pub fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
        }
    }
}

impl AppConfig {
    /// Read `path`, falling back to defaults when it is missing or invalid,
    /// then write it back so newly added fields show up in the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match serde_json::from_str::<AppConfig>(&content) {
                Ok(c) => {
                    info!("Loaded configuration from {}", path.display());
                    c
                }
                Err(e) => {
                    warn!("Error parsing config: {}. Loading defaults.", e);
                    Self::default()
                }
            }
        } else {
            info!("Configuration file not found. Creating default at {}", path.display());
            Self::default()
        };

        config.save(path)?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());
        assert_eq!(config.storage.dataset_file, "facial_expressions.csv");
    }

    #[test]
    fn partial_file_keeps_values_and_fills_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "camera": { "index": 2 }, "training": { "max_depth": 6 } }"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.camera.index, 2);
        assert!(config.camera.mirror);
        assert_eq!(config.training.tree_params().max_depth, Some(6));
        assert_eq!(config.training.split(), SplitConfig::default());

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("stall_timeout_secs"));
    }

    #[test]
    fn broken_json_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn zero_stall_timeout_means_wait_forever() {
        let mut capture = CaptureConfig::default();
        assert_eq!(capture.stall_timeout(), Some(Duration::from_secs(30)));
        capture.stall_timeout_secs = 0;
        assert_eq!(capture.stall_timeout(), None);
    }
}
