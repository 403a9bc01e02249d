//! User-tunable settings.
//!
//! Out-of-range values are clamped on every write path rather than rejected:
//! `detectionFPS` into [5, 30] and `modelConfidenceThreshold` into [0.1, 1.0].

use serde::{Deserialize, Serialize};

pub const MIN_DETECTION_FPS: u32 = 5;
pub const MAX_DETECTION_FPS: u32 = 30;
pub const MIN_CONFIDENCE_THRESHOLD: f64 = 0.1;
pub const MAX_CONFIDENCE_THRESHOLD: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "showLandmarks")]
    pub show_landmarks: bool,
    #[serde(rename = "showFPS")]
    pub show_fps: bool,
    #[serde(rename = "detectionFPS")]
    pub detection_fps: u32,
    #[serde(rename = "modelConfidenceThreshold")]
    pub model_confidence_threshold: f64,
    #[serde(rename = "enableDataCollection")]
    pub enable_data_collection: bool,
    #[serde(rename = "darkMode")]
    pub dark_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            show_landmarks: true,
            show_fps: false,
            detection_fps: 15,
            model_confidence_threshold: 0.7,
            enable_data_collection: false,
            dark_mode: true,
        }
    }
}

impl Settings {
    /// Returns a copy with every bounded field inside its range.
    pub fn clamped(mut self) -> Self {
        self.detection_fps = clamp_fps(self.detection_fps);
        self.model_confidence_threshold = if self.model_confidence_threshold.is_finite() {
            clamp_threshold(self.model_confidence_threshold)
        } else {
            Settings::default().model_confidence_threshold
        };
        self
    }

    /// Interval between detection ticks.
    pub fn detection_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(1000 / u64::from(clamp_fps(self.detection_fps)))
    }
}

fn clamp_fps(fps: u32) -> u32 {
    fps.clamp(MIN_DETECTION_FPS, MAX_DETECTION_FPS)
}

fn clamp_threshold(threshold: f64) -> f64 {
    threshold.clamp(MIN_CONFIDENCE_THRESHOLD, MAX_CONFIDENCE_THRESHOLD)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    pub show_landmarks: Option<bool>,
    pub show_fps: Option<bool>,
    pub detection_fps: Option<u32>,
    pub model_confidence_threshold: Option<f64>,
    pub enable_data_collection: Option<bool>,
    pub dark_mode: Option<bool>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == SettingsPatch::default()
    }

    pub(crate) fn apply(self, settings: &mut Settings) {
        if let Some(v) = self.show_landmarks {
            settings.show_landmarks = v;
        }
        if let Some(v) = self.show_fps {
            settings.show_fps = v;
        }
        if let Some(v) = self.detection_fps {
            let clamped = clamp_fps(v);
            if clamped != v {
                log::warn!("detectionFPS {} out of range, clamped to {}", v, clamped);
            }
            settings.detection_fps = clamped;
        }
        if let Some(v) = self.model_confidence_threshold {
            if v.is_finite() {
                let clamped = clamp_threshold(v);
                if clamped != v {
                    log::warn!("modelConfidenceThreshold {} out of range, clamped to {}", v, clamped);
                }
                settings.model_confidence_threshold = clamped;
            } else {
                log::warn!("Ignoring non-finite modelConfidenceThreshold");
            }
        }
        if let Some(v) = self.enable_data_collection {
            settings.enable_data_collection = v;
        }
        if let Some(v) = self.dark_mode {
            settings.dark_mode = v;
        }
    }
}
