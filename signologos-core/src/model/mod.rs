//! Model lifecycle: `Unloaded -> Loading -> Loaded`, with `Training` and
//! `Inferring` entered only from `Loaded` and always returning to it.

mod placeholder;

pub use placeholder::PlaceholderModel;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::watch;

use crate::error::ModelError;
use crate::state::lock;
use crate::store::AppStore;
use crate::training::TrainingSample;
use crate::types::{DetectionResult, GestureScore, ModelPrediction, ModelStatus};

/// Alternatives kept on a prediction besides the best candidate.
pub const MAX_ALTERNATIVES: usize = 5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    pub accuracy: Option<f64>,
}

/// An inference engine.
#[async_trait]
pub trait GestureModel: Send + Sync {
    fn version(&self) -> String;

    async fn load(&self) -> Result<(), ModelError>;

    /// Trains on `samples`, calling `progress` with values in [0, 1].
    async fn train(
        &self,
        samples: &[TrainingSample],
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<TrainingReport, ModelError>;

    /// Scores every known gesture for a sequence of frames. Order and range
    /// are not required; the manager normalizes them.
    async fn infer(&self, frames: &[DetectionResult]) -> Result<Vec<GestureScore>, ModelError>;

    /// Frees whatever `load` acquired.
    fn release(&self) {}
}

type LoadOutcome = Option<Result<(), ModelError>>;

enum LoadStart {
    AlreadyLoaded,
    Join(watch::Receiver<LoadOutcome>),
    Lead(watch::Sender<LoadOutcome>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Load,
    Train,
    Infer,
}

pub struct ModelManager {
    store: AppStore,
    model: Arc<dyn GestureModel>,
    // Present while a load is running; later callers wait on it.
    inflight: Mutex<Option<watch::Receiver<LoadOutcome>>>,
    last_timestamp: AtomicI64,
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("version", &self.model.version())
            .field("status", &self.status())
            .finish()
    }
}

impl ModelManager {
    pub fn new(store: AppStore, model: Arc<dyn GestureModel>) -> Self {
        let last_timestamp = store
            .snapshot()
            .prediction_history
            .latest()
            .map_or(0, |p| p.timestamp);
        Self {
            store,
            model,
            inflight: Mutex::new(None),
            last_timestamp: AtomicI64::new(last_timestamp),
        }
    }

    pub fn status(&self) -> ModelStatus {
        self.store.snapshot().model.status()
    }

    /// Loads the model. A no-op once loaded; a call made while another load
    /// is running shares that load's result.
    pub async fn load(&self) -> Result<(), ModelError> {
        let start = {
            let mut inflight = lock(&self.inflight);
            if let Some(receiver) = inflight.as_ref() {
                LoadStart::Join(receiver.clone())
            } else if self.store.snapshot().model.is_loaded {
                LoadStart::AlreadyLoaded
            } else {
                let (sender, receiver) = watch::channel(None);
                *inflight = Some(receiver);
                LoadStart::Lead(sender)
            }
        };
        let sender = match start {
            LoadStart::AlreadyLoaded => return Ok(()),
            LoadStart::Join(receiver) => {
                debug!("Model load already in progress, waiting for it");
                return Self::join_load(receiver).await;
            }
            LoadStart::Lead(sender) => sender,
        };

        self.store.update(|s| {
            let model = s.model_mut();
            model.is_loading = true;
            model.error = None;
        });

        let mut pending = Pending::new(self, Operation::Load);
        let version = self.model.version();
        info!("Loading gesture model {}", version);
        let result = self.model.load().await.map_err(|e| match e {
            ModelError::LoadFailure(_) => e,
            other => ModelError::LoadFailure(other.to_string()),
        });
        pending.finish();

        self.store.update(|s| {
            let model = s.model_mut();
            model.is_loading = false;
            match &result {
                Ok(()) => {
                    model.is_loaded = true;
                    model.error = None;
                    model.model_version = version.clone();
                }
                Err(e) => {
                    model.is_loaded = false;
                    model.error = Some(e.to_string());
                }
            }
        });
        lock(&self.inflight).take();

        match &result {
            Ok(()) => info!("Gesture model {} loaded", version),
            Err(e) => warn!("Gesture model failed to load: {}", e),
        }
        // Nobody waiting is fine.
        let _ = sender.send(Some(result.clone()));
        result
    }

    async fn join_load(mut receiver: watch::Receiver<LoadOutcome>) -> Result<(), ModelError> {
        let abandoned = || Err(ModelError::LoadFailure("load was cancelled".to_string()));
        match receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or_else(abandoned),
            Err(_) => abandoned(),
        }
    }

    /// Trains on `samples`. The model must be loaded and idle.
    pub async fn train(&self, samples: &[TrainingSample]) -> Result<TrainingReport, ModelError> {
        self.begin(Operation::Train)?;
        let mut pending = Pending::new(self, Operation::Train);
        info!("Training on {} samples", samples.len());

        let store = self.store.clone();
        let progress = move |fraction: f64| {
            let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
            store.update(|s| s.model_mut().training_progress = Some(fraction));
        };
        let result = self.model.train(samples, &progress).await.map_err(|e| match e {
            ModelError::TrainingFailure(_) => e,
            other => ModelError::TrainingFailure(other.to_string()),
        });
        pending.finish();

        self.store.update(|s| {
            let model = s.model_mut();
            model.is_training = false;
            match &result {
                Ok(report) => {
                    model.training_progress = Some(1.0);
                    if report.accuracy.is_some() {
                        model.accuracy = report.accuracy;
                    }
                }
                Err(e) => {
                    model.training_progress = None;
                    model.error = Some(e.to_string());
                }
            }
        });

        match &result {
            Ok(report) => info!("Training finished (accuracy {:?})", report.accuracy),
            Err(e) => warn!("{}", e),
        }
        result
    }

    /// Runs inference over `frames`.
    ///
    /// Returns `Ok(None)` when the best candidate is below the confidence
    /// threshold in the settings. A prediction that clears it becomes the
    /// current prediction and is appended to the prediction history.
    pub async fn infer(&self, frames: &[DetectionResult]) -> Result<Option<ModelPrediction>, ModelError> {
        self.begin(Operation::Infer)?;
        let mut pending = Pending::new(self, Operation::Infer);
        let result = self.model.infer(frames).await.map_err(|e| match e {
            ModelError::InferenceFailure(_) => e,
            other => ModelError::InferenceFailure(other.to_string()),
        });
        pending.finish();

        let scores = match result {
            Ok(scores) => scores,
            Err(e) => {
                warn!("{}", e);
                self.store.update(|s| {
                    let model = s.model_mut();
                    model.is_inferring = false;
                    model.error = Some(e.to_string());
                });
                return Err(e);
            }
        };

        let timestamp = self.next_timestamp();
        let prediction = self.store.update(|s| {
            s.model_mut().is_inferring = false;

            let threshold = s.settings.model_confidence_threshold;
            let prediction = ModelPrediction::from_scores(scores, MAX_ALTERNATIVES, timestamp)
                .filter(|p| p.confidence >= threshold);

            match &prediction {
                Some(p) => {
                    s.current_prediction = Arc::new(Some(p.clone()));
                    if let Err(e) = s.prediction_history_mut().push(p.clone()) {
                        warn!("Prediction not added to history: {}", e);
                    }
                }
                None => {
                    if s.current_prediction.is_some() {
                        s.current_prediction = Arc::new(None);
                    }
                }
            }
            prediction
        });

        if let Some(p) = &prediction {
            debug!("Predicted {} ({:.2})", p.gesture_id, p.confidence);
        }
        Ok(prediction)
    }

    /// Returns a loaded, idle model to Unloaded.
    pub fn unload(&self) -> Result<(), ModelError> {
        let released = self.store.update(|s| match s.model.status() {
            ModelStatus::Loading => Err(ModelError::Busy("loading")),
            ModelStatus::Training => Err(ModelError::Busy("training")),
            ModelStatus::Inferring => Err(ModelError::Busy("inferring")),
            ModelStatus::Unloaded => Ok(false),
            ModelStatus::Loaded => {
                let model = s.model_mut();
                model.is_loaded = false;
                model.error = None;
                model.training_progress = None;
                Ok(true)
            }
        })?;
        if released {
            self.model.release();
            info!("Gesture model unloaded");
        }
        Ok(())
    }

    // Enters Training or Inferring. Busy is returned without touching state.
    fn begin(&self, operation: Operation) -> Result<(), ModelError> {
        let outcome = self.store.update(|s| {
            let current = s.model.status();
            match current {
                ModelStatus::Training => return Err(ModelError::Busy("training")),
                ModelStatus::Inferring => return Err(ModelError::Busy("inferring")),
                ModelStatus::Loading => return Err(ModelError::Busy("loading")),
                ModelStatus::Unloaded => {
                    s.model_mut().error = Some(ModelError::NotLoaded.to_string());
                    return Err(ModelError::NotLoaded);
                }
                ModelStatus::Loaded => {}
            }

            let model = s.model_mut();
            model.error = None;
            match operation {
                Operation::Train => {
                    model.is_training = true;
                    model.training_progress = Some(0.0);
                }
                Operation::Infer => model.is_inferring = true,
                Operation::Load => {}
            }
            Ok(())
        });
        if let Err(e) = &outcome {
            debug!("Model {:?} rejected: {}", operation, e);
        }
        outcome
    }

    // Millisecond timestamps that never go backwards.
    fn next_timestamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let previous = self.last_timestamp.fetch_max(now, Ordering::SeqCst);
        previous.max(now)
    }

    // Restores the stable state after an operation was dropped mid-flight.
    fn abandon(&self, operation: Operation) {
        warn!("Model {:?} was cancelled", operation);
        if operation == Operation::Load {
            lock(&self.inflight).take();
        }
        self.store.update(|s| {
            let model = s.model_mut();
            match operation {
                Operation::Load => model.is_loading = false,
                Operation::Train => {
                    model.is_training = false;
                    model.training_progress = None;
                }
                Operation::Infer => model.is_inferring = false,
            }
        });
    }
}

struct Pending<'a> {
    manager: &'a ModelManager,
    operation: Operation,
    finished: bool,
}

impl<'a> Pending<'a> {
    fn new(manager: &'a ModelManager, operation: Operation) -> Self {
        Self {
            manager,
            operation,
            finished: false,
        }
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.manager.abandon(self.operation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsPatch;
    use std::time::Duration;

    fn score(id: &str, confidence: f64) -> GestureScore {
        GestureScore {
            gesture_id: id.to_string(),
            confidence,
        }
    }

    fn manager(model: PlaceholderModel) -> (ModelManager, Arc<PlaceholderModel>) {
        let model = Arc::new(model);
        (ModelManager::new(AppStore::builder().build(), model.clone()), model)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_loads_share_one_attempt() {
        let (manager, model) = manager(PlaceholderModel::new(Duration::from_millis(2000)));
        let (a, b) = tokio::join!(manager.load(), manager.load());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(model.load_count(), 1);
        assert_eq!(manager.status(), ModelStatus::Loaded);

        manager.load().await.unwrap();
        assert_eq!(model.load_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_load_returns_to_unloaded_with_error() {
        let model = PlaceholderModel::new(Duration::from_millis(10));
        model.fail_loads_with(Some("weights missing"));
        let (manager, model) = manager(model);

        let err = manager.load().await.unwrap_err();
        assert!(matches!(err, ModelError::LoadFailure(_)));
        assert_eq!(manager.status(), ModelStatus::Unloaded);
        let state = manager.store.snapshot().model.clone();
        assert!(!state.is_loaded && !state.is_loading);
        assert!(state.error.as_deref().unwrap().contains("weights missing"));

        model.fail_loads_with(None);
        manager.load().await.unwrap();
        assert_eq!(manager.status(), ModelStatus::Loaded);
        assert!(manager.store.snapshot().model.error.is_none());
    }

    #[tokio::test]
    async fn train_requires_loaded_model() {
        let (manager, _) = manager(PlaceholderModel::new(Duration::ZERO));
        let err = manager.train(&[]).await.unwrap_err();
        assert_eq!(err, ModelError::NotLoaded);
        assert!(manager.store.snapshot().model.error.is_some());
    }

    #[tokio::test]
    async fn train_reports_progress_and_accuracy() {
        let (manager, _) = manager(PlaceholderModel::new(Duration::ZERO).with_accuracy(0.82));
        manager.load().await.unwrap();
        let samples = vec![
            TrainingSample::capture("A", Vec::new(), 1000, "test", 1.0),
            TrainingSample::capture("B", Vec::new(), 1000, "test", 1.0),
        ];

        let report = manager.train(&samples).await.unwrap();
        assert_eq!(report.accuracy, Some(0.82));
        let state = manager.store.snapshot().model.clone();
        assert_eq!(state.status(), ModelStatus::Loaded);
        assert_eq!(state.accuracy, Some(0.82));
        assert_eq!(state.training_progress, Some(1.0));
    }

    #[tokio::test]
    async fn training_failure_returns_to_loaded() {
        let (manager, _) = manager(PlaceholderModel::new(Duration::ZERO));
        manager.load().await.unwrap();
        let err = manager.train(&[]).await.unwrap_err();
        assert!(matches!(err, ModelError::TrainingFailure(_)));
        let state = manager.store.snapshot().model.clone();
        assert!(state.is_loaded && !state.is_training);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn inference_below_threshold_is_none() {
        let model = PlaceholderModel::new(Duration::ZERO).with_scores(vec![score("A", 0.4), score("B", 0.3)]);
        let (manager, _) = manager(model);
        manager.load().await.unwrap();

        assert_eq!(manager.infer(&[]).await.unwrap(), None);
        let snapshot = manager.store.snapshot();
        assert!(snapshot.current_prediction.is_none());
        assert!(snapshot.prediction_history.is_empty());
        assert_eq!(snapshot.model.status(), ModelStatus::Loaded);
    }

    #[tokio::test]
    async fn inference_above_threshold_is_recorded() {
        let scores = vec![
            score("B", 0.1),
            score("A", 0.9),
            score("C", 0.2),
            score("D", 0.05),
            score("E", 0.03),
            score("F", 0.02),
            score("G", 0.01),
        ];
        let (manager, _) = manager(PlaceholderModel::new(Duration::ZERO).with_scores(scores));
        manager.load().await.unwrap();

        let prediction = manager.infer(&[]).await.unwrap().unwrap();
        assert_eq!(prediction.gesture_id, "A");
        assert_eq!(prediction.alternatives.len(), MAX_ALTERNATIVES);
        assert_eq!(prediction.alternatives[0].gesture_id, "C");

        let snapshot = manager.store.snapshot();
        assert_eq!(*snapshot.current_prediction, Some(prediction.clone()));
        assert_eq!(snapshot.prediction_history.len(), 1);
    }

    #[tokio::test]
    async fn lowering_threshold_admits_prediction() {
        let model = PlaceholderModel::new(Duration::ZERO).with_scores(vec![score("A", 0.4)]);
        let (manager, _) = manager(model);
        manager.load().await.unwrap();
        manager.store.update_settings(SettingsPatch {
            model_confidence_threshold: Some(0.3),
            ..Default::default()
        });
        assert!(manager.infer(&[]).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn busy_rejection_leaves_state_alone() {
        let model = PlaceholderModel::new(Duration::ZERO).with_train_time(Duration::from_millis(500));
        let (manager, _) = manager(model);
        manager.load().await.unwrap();
        let samples = vec![TrainingSample::capture("A", Vec::new(), 1000, "test", 1.0)];

        let (trained, inferred) = tokio::join!(manager.train(&samples), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let before = manager.store.snapshot().model.clone();
            let result = manager.infer(&[]).await;
            assert!(Arc::ptr_eq(&before, &manager.store.snapshot().model));
            result
        });
        assert!(trained.is_ok());
        assert_eq!(inferred.unwrap_err(), ModelError::Busy("training"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_load_restores_state() {
        let (manager, _) = manager(PlaceholderModel::new(Duration::from_millis(2000)));
        let outcome = tokio::time::timeout(Duration::from_millis(100), manager.load()).await;
        assert!(outcome.is_err());

        let state = manager.store.snapshot().model.clone();
        assert_eq!(state.status(), ModelStatus::Unloaded);
        manager.load().await.unwrap();
        assert_eq!(manager.status(), ModelStatus::Loaded);
    }

    #[tokio::test]
    async fn unload_returns_to_unloaded() {
        let (manager, model) = manager(PlaceholderModel::new(Duration::ZERO));
        manager.load().await.unwrap();
        manager.unload().unwrap();
        assert_eq!(manager.status(), ModelStatus::Unloaded);
        assert!(!model.is_loaded());
        manager.unload().unwrap();
    }
}
