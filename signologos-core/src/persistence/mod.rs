//! Durable storage of the persisted state subset: settings, the training
//! corpus and the newest predictions.

pub mod migrate;
mod storage;

pub use migrate::{CURRENT_VERSION, PERSISTED_PREDICTIONS};
pub use storage::{default_data_dir, FileStorage, MemoryStorage, StorageBackend};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PersistenceError;
use crate::settings::Settings;
use crate::state::{lock, AppState, StateContainer, Subscription};
use crate::training::TrainingSample;
use crate::types::ModelPrediction;

pub const STORE_NAMESPACE: &str = "signologos-store";

/// The persisted subset, as written to storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub settings: Settings,
    pub training_data: Vec<TrainingSample>,
    pub prediction_history: Vec<ModelPrediction>,
}

impl PersistedState {
    pub fn from_state(state: &AppState, persisted_predictions: usize) -> Self {
        Self {
            settings: (*state.settings).clone(),
            training_data: (*state.training_data).clone(),
            prediction_history: state.prediction_history.last(persisted_predictions),
        }
    }

    /// Serializes with the current schema version.
    pub fn to_document(&self) -> Result<String, PersistenceError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert("version".into(), Value::from(CURRENT_VERSION));
        }
        Ok(serde_json::to_string(&value)?)
    }

    /// Parses and migrates a stored document. Settings fields that do not fit
    /// fall back to their defaults one by one; malformed list entries and
    /// samples with quality outside [0, 1] are dropped.
    pub fn from_document(text: &str) -> Result<Self, PersistenceError> {
        let document: Value = serde_json::from_str(text)?;
        let document = migrate::migrate(document)?;

        let settings = match document.get("settings") {
            Some(value) => settings_from(value),
            None => Settings::default(),
        }
        .clamped();

        let training_data = entries::<TrainingSample>(&document, "trainingData")
            .into_iter()
            .filter(|sample| {
                let valid = (0.0..=1.0).contains(&sample.metadata.quality);
                if !valid {
                    warn!(
                        "Skipping stored sample {}: quality {} outside [0, 1]",
                        sample.id, sample.metadata.quality
                    );
                }
                valid
            })
            .collect();

        Ok(Self {
            settings,
            training_data,
            prediction_history: entries(&document, "predictionHistory"),
        })
    }

    /// Writes the subset into `state`, replacing what was there.
    pub fn apply_to(self, state: &mut AppState) {
        *state.settings_mut() = self.settings;
        *state.training_data_mut() = self.training_data;

        let mut predictions = self.prediction_history;
        predictions.sort_by_key(|p| p.timestamp);
        let history = state.prediction_history_mut();
        history.clear();
        for prediction in predictions {
            if let Err(e) = history.push(prediction) {
                warn!("Dropping stored prediction: {}", e);
            }
        }
    }
}

// Keeps every stored field that reads on its own; the rest stay at defaults.
fn settings_from(value: &Value) -> Settings {
    let Value::Object(stored) = value else {
        warn!("Stored settings are not an object, using defaults");
        return Settings::default();
    };

    let mut accepted = Map::new();
    for (key, field) in stored {
        let single = Value::Object(Map::from_iter([(key.clone(), field.clone())]));
        match Settings::deserialize(&single) {
            Ok(_) => {
                accepted.insert(key.clone(), field.clone());
            }
            Err(e) => warn!("Stored setting '{}' unreadable ({}), using default", key, e),
        }
    }

    Settings::deserialize(&Value::Object(accepted)).unwrap_or_else(|e| {
        warn!("Stored settings unreadable ({}), using defaults", e);
        Settings::default()
    })
}

fn entries<T: serde::de::DeserializeOwned>(document: &Value, field: &str) -> Vec<T> {
    let Some(items) = document.get(field).and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match T::deserialize(item) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping stored {} entry {}: {}", field, index, e);
                None
            }
        })
        .collect()
}

/// Writes the persisted subset on every change and restores it at startup.
pub struct PersistenceGateway {
    backend: Arc<dyn StorageBackend>,
    key: String,
    persisted_predictions: usize,
    writer: Mutex<()>,
    queued: AtomicBool,
}

impl std::fmt::Debug for PersistenceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceGateway")
            .field("key", &self.key)
            .field("persisted_predictions", &self.persisted_predictions)
            .finish()
    }
}

impl PersistenceGateway {
    pub fn new(backend: Arc<dyn StorageBackend>, key: &str) -> Self {
        Self {
            backend,
            key: key.to_string(),
            persisted_predictions: PERSISTED_PREDICTIONS,
            writer: Mutex::new(()),
            queued: AtomicBool::new(false),
        }
    }

    pub fn with_persisted_predictions(mut self, count: usize) -> Self {
        self.persisted_predictions = count;
        self
    }

    /// Reads the stored subset. Absent, unreadable or unmigratable documents
    /// yield the defaults.
    pub fn rehydrate(&self) -> PersistedState {
        let text = match self.backend.read(&self.key) {
            Ok(Some(text)) => text,
            Ok(None) => {
                info!("No stored state under '{}', starting from defaults", self.key);
                return PersistedState::default();
            }
            Err(e) => {
                error!("Failed to read stored state: {}", e);
                return PersistedState::default();
            }
        };

        match PersistedState::from_document(&text) {
            Ok(state) => {
                info!(
                    "Restored {} training samples and {} predictions",
                    state.training_data.len(),
                    state.prediction_history.len()
                );
                state
            }
            Err(e) => {
                error!("Discarding stored state: {}", e);
                PersistedState::default()
            }
        }
    }

    /// Serializes the subset of `state` and writes it.
    pub fn persist(&self, state: &AppState) -> Result<(), PersistenceError> {
        let _writer = lock(&self.writer);
        self.write_locked(state)
    }

    fn write_locked(&self, state: &AppState) -> Result<(), PersistenceError> {
        let document = PersistedState::from_state(state, self.persisted_predictions).to_document()?;
        self.backend.write(&self.key, &document)?;
        debug!("Persisted state under '{}' ({} bytes)", self.key, document.len());
        Ok(())
    }

    // Takes the snapshot inside the writer lock so the last write always
    // carries the newest state.
    fn persist_latest(&self, container: &StateContainer) {
        let _writer = lock(&self.writer);
        self.queued.store(false, Ordering::SeqCst);
        let snapshot = container.get();
        if let Err(e) = self.write_locked(&snapshot) {
            error!("Failed to persist state: {}", e);
        }
    }

    // Inside a runtime the write goes to the blocking pool, and changes that
    // arrive while one is queued are folded into it. Without a runtime it
    // happens inline.
    fn schedule_persist(self: &Arc<Self>, container: Arc<StateContainer>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.persist_latest(&container);
            return;
        };
        if self.queued.swap(true, Ordering::SeqCst) {
            return;
        }
        let gateway = Arc::clone(self);
        handle.spawn_blocking(move || gateway.persist_latest(&container));
    }

    /// Subscribes to the persisted slices of `container`.
    pub fn attach(self: &Arc<Self>, container: &Arc<StateContainer>) -> Subscription {
        let gateway = Arc::downgrade(self);
        let weak_container: Weak<StateContainer> = Arc::downgrade(container);
        container.subscribe(
            |s: &AppState| {
                (
                    s.settings.clone(),
                    s.training_data.clone(),
                    s.prediction_history.clone(),
                )
            },
            move |_| {
                if let (Some(gateway), Some(container)) = (gateway.upgrade(), weak_container.upgrade()) {
                    gateway.schedule_persist(container);
                }
            },
        )
    }
}
