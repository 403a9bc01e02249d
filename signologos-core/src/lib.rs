//! Application state coordinator for the Signologos gesture translator.
//!
//! [`AppStore`] owns every piece of mutable state and exposes the command
//! surface; [`CameraManager`] and [`ModelManager`] drive the two asynchronous
//! lifecycles through it. Persisted state is restored when the store is built
//! and written back whenever settings, the training corpus or the prediction
//! history change.

pub mod camera;
pub mod config;
pub mod error;
pub mod history;
pub mod model;
pub mod notifications;
pub mod persistence;
pub mod settings;
pub mod state;
pub mod store;
pub mod training;
pub mod types;

pub use camera::{CameraManager, CaptureDevice, SyntheticCaptureDevice, VideoStream};
#[cfg(feature = "opencv-camera")]
pub use camera::OpencvCaptureDevice;
pub use config::CoordinatorConfig;
pub use error::{CameraError, HistoryError, ImportError, ModelError, PersistenceError};
pub use model::{GestureModel, ModelManager, PlaceholderModel, TrainingReport};
pub use notifications::{ActionKind, NewNotification, Notification, NotificationKind, Scheduler, TokioScheduler};
pub use persistence::{FileStorage, MemoryStorage, PersistenceGateway, StorageBackend};
pub use settings::{Settings, SettingsPatch};
pub use state::{select, AppState, Subscription};
pub use store::{AppStore, AppStoreBuilder};
pub use training::{ImportReport, TrainingExport, TrainingSample};
pub use types::{
    CameraPatch, CameraStatus, DetectionResult, GestureScore, MediaConstraints, ModelPatch, ModelPrediction,
    ModelStatus,
};
