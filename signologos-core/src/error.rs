//! Error types for the coordinator.
//!
//! Every error here is also recorded into the owning slice of the state
//! (camera error, model error, import report) before it reaches a caller.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("no camera available: {0}")]
    DeviceUnavailable(String),
}

impl CameraError {
    /// Message shown to the user in `CameraState::error`.
    pub fn user_message(&self) -> String {
        match self {
            CameraError::PermissionDenied(_) => {
                "Could not access the camera. Check the permissions.".to_string()
            }
            CameraError::DeviceUnavailable(detail) => format!("No camera available: {}", detail),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("model load failed: {0}")]
    LoadFailure(String),

    #[error("model is not loaded")]
    NotLoaded,

    #[error("model is busy ({0})")]
    Busy(&'static str),

    #[error("training failed: {0}")]
    TrainingFailure(String),

    #[error("inference failed: {0}")]
    InferenceFailure(String),
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unrecognized schema version {found} (current is {current})")]
    Migration { found: u64, current: u64 },

    #[error("storage I/O error: {0}")]
    Storage(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImportError {
    #[error("import document is not valid JSON: {0}")]
    Unparseable(String),

    #[error("import document has no `trainingData` array")]
    MissingSamples,

    #[error("entry {index}: {reason}")]
    InvalidEntry { index: usize, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("timestamp {incoming} is older than the newest buffered item ({newest})")]
    OutOfOrder { newest: i64, incoming: i64 },
}
