//! The application store: the state container plus every command the
//! presentation layer may issue against it.
//!
//! An [`AppStore`] is a cheap handle; clones share the same state. Build one
//! with [`AppStore::builder`], which rehydrates persisted state before it
//! returns, so no command ever runs against un-migrated data.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::{HistoryError, PersistenceError};
use crate::history::{DETECTION_CAPACITY, PREDICTION_CAPACITY};
use crate::notifications::{
    next_notification_id, ExpiryTimers, NewNotification, Scheduler, TokioScheduler, DEFAULT_DURATION_MS,
};
use crate::persistence::{PersistenceGateway, StorageBackend, PERSISTED_PREDICTIONS, STORE_NAMESPACE};
use crate::settings::{Settings, SettingsPatch};
use crate::state::{lock, AppState, Selection, StateContainer, Subscription};
use crate::training::{parse_import, ImportReport, TrainingExport, TrainingSample};
use crate::types::{CameraPatch, DetectionResult, MediaConstraints, ModelPatch, ModelPrediction};

#[derive(Clone)]
pub struct AppStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    container: Arc<StateContainer>,
    timers: ExpiryTimers,
    scheduler: Arc<dyn Scheduler>,
    default_duration_ms: u64,
    gateway: Option<Arc<PersistenceGateway>>,
    persistence: Mutex<Option<Subscription>>,
}

impl std::fmt::Debug for AppStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppStore")
            .field("container", &self.inner.container)
            .field("pending_expiries", &self.inner.timers.len())
            .field("gateway", &self.inner.gateway)
            .finish()
    }
}

impl AppStore {
    pub fn builder() -> AppStoreBuilder {
        AppStoreBuilder::default()
    }

    pub fn snapshot(&self) -> Arc<AppState> {
        self.inner.container.get()
    }

    /// See [`StateContainer::subscribe`].
    pub fn subscribe<S, Sel, F>(&self, selector: Sel, callback: F) -> Subscription
    where
        S: Selection,
        Sel: Fn(&AppState) -> S + Send + 'static,
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.inner.container.subscribe(selector, callback)
    }

    pub(crate) fn update<R>(&self, mutate: impl FnOnce(&mut AppState) -> R) -> R {
        self.inner.container.update(mutate)
    }

    // Camera and model

    pub fn set_camera_state(&self, patch: CameraPatch) {
        self.update(|s| patch.apply(s.camera_mut()));
    }

    pub fn set_model_state(&self, patch: ModelPatch) {
        self.update(|s| patch.apply(s.model_mut()));
    }

    // Histories

    /// Appends a detection frame; an out-of-order frame is dropped.
    pub fn add_detection_result(&self, result: DetectionResult) -> Result<(), HistoryError> {
        let outcome = self.update(|s| {
            s.detection_results.accepts(&result)?;
            s.detection_results_mut().push(result)
        });
        if let Err(e) = &outcome {
            warn!("Dropping detection frame: {}", e);
        }
        outcome
    }

    pub fn clear_detection_results(&self) {
        self.update(|s| {
            if !s.detection_results.is_empty() {
                s.detection_results_mut().clear();
            }
        });
    }

    pub fn set_current_prediction(&self, prediction: Option<ModelPrediction>) {
        self.update(|s| s.current_prediction = Arc::new(prediction));
    }

    pub fn add_prediction_to_history(&self, prediction: ModelPrediction) -> Result<(), HistoryError> {
        let outcome = self.update(|s| {
            s.prediction_history.accepts(&prediction)?;
            s.prediction_history_mut().push(prediction)
        });
        if let Err(e) = &outcome {
            warn!("Dropping prediction: {}", e);
        }
        outcome
    }

    pub fn clear_prediction_history(&self) {
        self.update(|s| {
            if !s.prediction_history.is_empty() {
                s.prediction_history_mut().clear();
            }
        });
    }

    /// Sets the global busy flag.
    pub fn set_loading(&self, loading: bool) {
        self.update(|s| {
            if *s.is_loading != loading {
                s.is_loading = Arc::new(loading);
            }
        });
    }

    // Notifications

    /// Queues a notification and returns its id. Unless its duration is 0 it
    /// is removed automatically once the duration elapses.
    pub fn add_notification(&self, notification: NewNotification) -> String {
        let id = next_notification_id();
        let notification = notification.into_notification(id.clone(), self.inner.default_duration_ms);
        let duration = notification.duration;
        debug!("Notification {} ({:?}): {}", id, notification.kind, notification.title);

        self.update(|s| s.notifications_mut().push(notification));

        if duration > 0 {
            let store = Arc::downgrade(&self.inner);
            let expiring = id.clone();
            self.inner.timers.arm(id.clone(), || {
                self.inner.scheduler.schedule(
                    Duration::from_millis(duration),
                    Box::new(move || StoreInner::expire(&store, &expiring)),
                )
            });
        }
        id
    }

    /// Removes the notification and cancels its expiry. Returns whether it
    /// was still queued.
    pub fn remove_notification(&self, id: &str) -> bool {
        self.inner.timers.cancel(id);
        self.inner.remove_notification(id)
    }

    pub fn clear_notifications(&self) {
        self.inner.timers.cancel_all();
        self.update(|s| {
            if !s.notifications.is_empty() {
                s.notifications_mut().clear();
            }
        });
    }

    /// Number of expiry timers still pending.
    pub fn pending_expiries(&self) -> usize {
        self.inner.timers.len()
    }

    // Settings

    /// Merges `patch` into the settings, clamping bounded fields, and
    /// returns the result.
    pub fn update_settings(&self, patch: SettingsPatch) -> Settings {
        if patch.is_empty() {
            return (*self.snapshot().settings).clone();
        }
        self.update(|s| {
            let settings = s.settings_mut();
            patch.apply(settings);
            settings.clone()
        })
    }

    pub fn reset_settings(&self) -> Settings {
        info!("Resetting settings to defaults");
        self.update(|s| {
            *s.settings_mut() = Settings::default();
            Settings::default()
        })
    }

    // Training corpus

    /// Appends `sample`. Ids are the caller's responsibility.
    pub fn add_training_data(&self, sample: TrainingSample) {
        self.update(|s| s.training_data_mut().push(sample));
    }

    /// Removes the sample with `id`; returns whether one was found.
    pub fn remove_training_data(&self, id: &str) -> bool {
        self.update(|s| {
            if !s.training_data.iter().any(|sample| sample.id == id) {
                return false;
            }
            s.training_data_mut().retain(|sample| sample.id != id);
            true
        })
    }

    pub fn clear_training_data(&self) {
        self.update(|s| {
            if !s.training_data.is_empty() {
                s.training_data_mut().clear();
            }
        });
    }

    pub fn export_training_data(&self) -> TrainingExport {
        TrainingExport::new((*self.snapshot().training_data).clone())
    }

    /// Imports an export document. Valid entries are appended even when others
    /// are rejected; the report lists every rejected entry.
    pub fn import_training_data(&self, text: &str) -> ImportReport {
        let report = self.update(|s| {
            let (accepted, report) = parse_import(text, &s.training_data);
            if !accepted.is_empty() {
                s.training_data_mut().extend(accepted);
            }
            report
        });

        info!(
            "Imported {} training samples ({} rejected)",
            report.imported,
            report.errors.len()
        );
        for error in &report.errors {
            warn!("Import: {}", error);
        }
        report
    }

    // Persistence

    /// Writes the persisted subset now. Changes are already written as they
    /// happen; this reports the result of a write to the caller.
    pub fn persist(&self) -> Result<(), PersistenceError> {
        match &self.inner.gateway {
            Some(gateway) => gateway.persist(&self.snapshot()),
            None => Ok(()),
        }
    }
}

impl StoreInner {
    fn expire(store: &Weak<StoreInner>, id: &str) {
        let Some(inner) = store.upgrade() else {
            return;
        };
        inner.timers.forget(id);
        if inner.remove_notification(id) {
            debug!("Notification {} expired", id);
        }
    }

    fn remove_notification(&self, id: &str) -> bool {
        self.container.update(|s| {
            if !s.notifications.iter().any(|n| n.id == id) {
                return false;
            }
            s.notifications_mut().retain(|n| n.id != id);
            true
        })
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        // Detach persistence before the container goes away.
        lock(&self.persistence).take();
        self.timers.cancel_all();
    }
}

pub struct AppStoreBuilder {
    scheduler: Option<Arc<dyn Scheduler>>,
    storage: Option<Arc<dyn StorageBackend>>,
    namespace: String,
    constraints: MediaConstraints,
    detection_capacity: usize,
    prediction_capacity: usize,
    persisted_predictions: usize,
    default_duration_ms: u64,
}

impl Default for AppStoreBuilder {
    fn default() -> Self {
        Self {
            scheduler: None,
            storage: None,
            namespace: STORE_NAMESPACE.to_string(),
            constraints: MediaConstraints::default(),
            detection_capacity: DETECTION_CAPACITY,
            prediction_capacity: PREDICTION_CAPACITY,
            persisted_predictions: PERSISTED_PREDICTIONS,
            default_duration_ms: DEFAULT_DURATION_MS,
        }
    }
}

impl AppStoreBuilder {
    /// Applies every store-related section of `config`.
    pub fn config(mut self, config: &CoordinatorConfig) -> Self {
        self.namespace = config.storage.namespace.clone();
        self.constraints = config.camera.constraints();
        self.detection_capacity = config.history.detection_capacity;
        self.prediction_capacity = config.history.prediction_capacity;
        self.persisted_predictions = config.history.persisted_predictions;
        self.default_duration_ms = config.notifications.default_duration_ms;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Persists through `storage`. Without one the store lives in memory only.
    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn constraints(mut self, constraints: MediaConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn capacities(mut self, detection: usize, prediction: usize) -> Self {
        self.detection_capacity = detection;
        self.prediction_capacity = prediction;
        self
    }

    pub fn default_notification_duration(mut self, duration_ms: u64) -> Self {
        self.default_duration_ms = duration_ms;
        self
    }

    /// Rehydrates persisted state, then starts persisting changes.
    pub fn build(self) -> AppStore {
        let mut state = AppState::new(self.constraints, self.detection_capacity, self.prediction_capacity);

        let gateway = self.storage.map(|storage| {
            Arc::new(
                PersistenceGateway::new(storage, &self.namespace)
                    .with_persisted_predictions(self.persisted_predictions),
            )
        });
        if let Some(gateway) = &gateway {
            gateway.rehydrate().apply_to(&mut state);
        }

        let container = Arc::new(StateContainer::new(state));
        let persistence = gateway.as_ref().map(|gateway| gateway.attach(&container));

        AppStore {
            inner: Arc::new(StoreInner {
                container,
                timers: ExpiryTimers::default(),
                scheduler: self.scheduler.unwrap_or_else(|| Arc::new(TokioScheduler)),
                default_duration_ms: self.default_duration_ms,
                gateway,
                persistence: Mutex::new(persistence),
            }),
        }
    }
}
