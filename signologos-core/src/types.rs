//! Entities held by the state container.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub facing_mode: FacingMode,
}

/// Ideal capture parameters requested from the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub video: VideoConstraints,
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: VideoConstraints {
                width: 1280,
                height: 720,
                frame_rate: 30,
                facing_mode: FacingMode::User,
            },
            audio: false,
        }
    }
}

/// State-visible descriptor of the stream held by the camera manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub id: String,
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraStatus {
    Idle,
    Requesting,
    Active,
    Error,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CameraState {
    pub is_active: bool,
    pub is_loading: bool,
    pub error: Option<String>,
    pub stream: Option<StreamInfo>,
    pub device_id: Option<String>,
    pub constraints: MediaConstraints,
}

impl CameraState {
    pub fn with_constraints(constraints: MediaConstraints) -> Self {
        Self {
            constraints,
            ..Self::default()
        }
    }

    pub fn status(&self) -> CameraStatus {
        if self.is_active {
            CameraStatus::Active
        } else if self.is_loading {
            CameraStatus::Requesting
        } else if self.error.is_some() {
            CameraStatus::Error
        } else {
            CameraStatus::Idle
        }
    }

    /// Restores the stream/active and error/loading invariants after a raw patch.
    pub(crate) fn normalize(&mut self) {
        if self.stream.is_none() && self.is_active {
            log::debug!("Camera marked active without a stream; clearing isActive");
            self.is_active = false;
        }
        if !self.is_active {
            self.stream = None;
        }
        if self.error.is_some() {
            self.is_loading = false;
        }
    }
}

/// Partial replacement for [`CameraState`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct CameraPatch {
    pub is_active: Option<bool>,
    pub is_loading: Option<bool>,
    pub error: Option<Option<String>>,
    pub stream: Option<Option<StreamInfo>>,
    pub device_id: Option<Option<String>>,
    pub constraints: Option<MediaConstraints>,
}

impl CameraPatch {
    pub(crate) fn apply(self, camera: &mut CameraState) {
        if let Some(v) = self.is_active {
            camera.is_active = v;
        }
        if let Some(v) = self.is_loading {
            camera.is_loading = v;
        }
        if let Some(v) = self.error {
            camera.error = v;
        }
        if let Some(v) = self.stream {
            camera.stream = v;
        }
        if let Some(v) = self.device_id {
            camera.device_id = v;
        }
        if let Some(v) = self.constraints {
            camera.constraints = v;
        }
        camera.normalize();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Loaded,
    Training,
    Inferring,
}

/// Failures are kept in `error` next to a stable status rather than being a
/// status of their own.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelState {
    pub is_loaded: bool,
    pub is_loading: bool,
    pub is_training: bool,
    pub is_inferring: bool,
    pub error: Option<String>,
    pub model_version: String,
    pub accuracy: Option<f64>,
    pub training_progress: Option<f64>,
}

impl Default for ModelState {
    fn default() -> Self {
        Self {
            is_loaded: false,
            is_loading: false,
            is_training: false,
            is_inferring: false,
            error: None,
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            accuracy: None,
            training_progress: None,
        }
    }
}

impl ModelState {
    pub fn status(&self) -> ModelStatus {
        if self.is_loading {
            ModelStatus::Loading
        } else if self.is_training {
            ModelStatus::Training
        } else if self.is_inferring {
            ModelStatus::Inferring
        } else if self.is_loaded {
            ModelStatus::Loaded
        } else {
            ModelStatus::Unloaded
        }
    }

    pub(crate) fn normalize(&mut self) {
        if self.is_training && self.is_inferring {
            log::warn!("Model cannot train and infer at once; dropping isInferring");
            self.is_inferring = false;
        }
        if !self.is_loaded {
            self.is_training = false;
            self.is_inferring = false;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelPatch {
    pub is_loaded: Option<bool>,
    pub is_loading: Option<bool>,
    pub is_training: Option<bool>,
    pub is_inferring: Option<bool>,
    pub error: Option<Option<String>>,
    pub model_version: Option<String>,
    pub accuracy: Option<Option<f64>>,
    pub training_progress: Option<Option<f64>>,
}

impl ModelPatch {
    pub(crate) fn apply(self, model: &mut ModelState) {
        if let Some(v) = self.is_loaded {
            model.is_loaded = v;
        }
        if let Some(v) = self.is_loading {
            model.is_loading = v;
        }
        if let Some(v) = self.is_training {
            model.is_training = v;
        }
        if let Some(v) = self.is_inferring {
            model.is_inferring = v;
        }
        if let Some(v) = self.error {
            model.error = v;
        }
        if let Some(v) = self.model_version {
            model.model_version = v;
        }
        if let Some(v) = self.accuracy {
            model.accuracy = v;
        }
        if let Some(v) = self.training_progress {
            model.training_progress = v;
        }
        model.normalize();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandLandmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Handedness {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandLandmarks {
    pub landmarks: Vec<HandLandmark>,
    pub handedness: Handedness,
    pub confidence: f64,
}

/// Raw landmark output for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub hands: Vec<HandLandmarks>,
    pub timestamp: i64,
    pub frame_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GestureScore {
    pub gesture_id: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPrediction {
    pub gesture_id: String,
    pub confidence: f64,
    #[serde(default)]
    pub alternatives: Vec<GestureScore>,
    pub timestamp: i64,
}

impl ModelPrediction {
    /// Builds a prediction from unordered candidate scores.
    ///
    /// Confidences are clamped into [0, 1], non-finite scores are dropped and
    /// the remaining candidates are ordered by descending confidence. The best
    /// candidate becomes the prediction and at most `max_alternatives` of the
    /// rest are kept.
    pub fn from_scores(
        mut scores: Vec<GestureScore>,
        max_alternatives: usize,
        timestamp: i64,
    ) -> Option<Self> {
        scores.retain(|s| s.confidence.is_finite());
        for score in &mut scores {
            score.confidence = score.confidence.clamp(0.0, 1.0);
        }
        scores.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut iter = scores.into_iter();
        let best = iter.next()?;
        Some(Self {
            gesture_id: best.gesture_id,
            confidence: best.confidence,
            alternatives: iter.take(max_alternatives).collect(),
            timestamp,
        })
    }
}
