use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};

use crate::types::{FacingMode, MediaConstraints, VideoConstraints};

const CONFIG_FILE: &str = "config.json";
const SYSTEM_CONFIG: &str = "/etc/signologos/config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default = "default_facing_mode")]
    pub facing_mode: FacingMode,
    /// V4L2 node used by the OpenCV capture device.
    #[serde(default = "default_device")]
    pub device: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_detection_capacity")]
    pub detection_capacity: usize,
    #[serde(default = "default_prediction_capacity")]
    pub prediction_capacity: usize,
    #[serde(default = "default_persisted_predictions")]
    pub persisted_predictions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_duration_ms")]
    pub default_duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_load_delay_ms")]
    pub placeholder_load_delay_ms: u64,
    /// Detection frames fed to each inference.
    #[serde(default = "default_sequence_length")]
    pub sequence_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Empty means the per-user data directory.
    #[serde(default)]
    pub data_dir: String,
}

fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_frame_rate() -> u32 { 30 }
fn default_facing_mode() -> FacingMode { FacingMode::User }
fn default_device() -> String { "/dev/video0".to_string() }
fn default_detection_capacity() -> usize { crate::history::DETECTION_CAPACITY }
fn default_prediction_capacity() -> usize { crate::history::PREDICTION_CAPACITY }
fn default_persisted_predictions() -> usize { crate::persistence::PERSISTED_PREDICTIONS }
fn default_duration_ms() -> u64 { crate::notifications::DEFAULT_DURATION_MS }
fn default_load_delay_ms() -> u64 { 2000 }
fn default_sequence_length() -> usize { 30 }
fn default_namespace() -> String { crate::persistence::STORE_NAMESPACE.to_string() }

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            history: HistoryConfig::default(),
            notifications: NotificationConfig::default(),
            model: ModelConfig::default(),
            storage: StorageConfig::default(),
            version: 1,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            frame_rate: default_frame_rate(),
            facing_mode: default_facing_mode(),
            device: default_device(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            detection_capacity: default_detection_capacity(),
            prediction_capacity: default_prediction_capacity(),
            persisted_predictions: default_persisted_predictions(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_duration_ms: default_duration_ms(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            placeholder_load_delay_ms: default_load_delay_ms(),
            sequence_length: default_sequence_length(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            data_dir: String::new(),
        }
    }
}

impl CameraConfig {
    pub fn constraints(&self) -> MediaConstraints {
        MediaConstraints {
            video: VideoConstraints {
                width: self.width,
                height: self.height,
                frame_rate: self.frame_rate,
                facing_mode: self.facing_mode,
            },
            audio: false,
        }
    }
}

impl StorageConfig {
    /// Directory holding the persisted store document.
    pub fn resolve_data_dir(&self) -> PathBuf {
        if self.data_dir.is_empty() {
            crate::persistence::default_data_dir()
        } else {
            PathBuf::from(&self.data_dir)
        }
    }
}

impl CoordinatorConfig {
    /// Loads `path`, or the defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: CoordinatorConfig = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads the first configuration found: `explicit`, the user config, then
    /// the system config.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                anyhow::bail!("Config file {} not found", path.display());
            }
            return Self::load(path);
        }

        for candidate in Self::search_paths() {
            if candidate.exists() {
                log::info!("Using config {}", candidate.display());
                return Self::load(&candidate);
            }
        }
        Ok(Self::default())
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("signologos").join(CONFIG_FILE));
        }
        paths.push(PathBuf::from(SYSTEM_CONFIG));
        paths
    }
}
