use std::fs;
use std::sync::Arc;

use serde_json::{json, Value};
use signologos_core::persistence::{CURRENT_VERSION, STORE_NAMESPACE};
use signologos_core::types::ModelPrediction;
use signologos_core::{AppStore, FileStorage, Settings, SettingsPatch, StorageBackend, TrainingSample};

fn file_store(dir: &std::path::Path) -> (AppStore, Arc<FileStorage>) {
    let storage = Arc::new(FileStorage::new(dir));
    let store = AppStore::builder().storage(storage.clone()).build();
    (store, storage)
}

fn prediction(gesture: &str, ts: i64) -> ModelPrediction {
    ModelPrediction {
        gesture_id: gesture.to_string(),
        confidence: 0.8,
        alternatives: Vec::new(),
        timestamp: ts,
    }
}

#[test]
fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let (store, _) = file_store(dir.path());
    store.update_settings(SettingsPatch {
        detection_fps: Some(24),
        show_landmarks: Some(false),
        ..Default::default()
    });
    let sample = TrainingSample::capture("gracias", Vec::new(), 2500, "laptop", 0.6);
    store.add_training_data(sample.clone());
    for ts in 1..=25 {
        store.add_prediction_to_history(prediction("hola", ts)).unwrap();
    }
    store.add_notification(signologos_core::NewNotification::info("not", "persisted").persistent());
    drop(store);

    let (restored, _) = file_store(dir.path());
    let state = restored.snapshot();
    assert_eq!(state.settings.detection_fps, 24);
    assert!(!state.settings.show_landmarks);
    assert_eq!(*state.training_data, vec![sample]);
    let stamps: Vec<i64> = state.prediction_history.iter().map(|p| p.timestamp).collect();
    assert_eq!(stamps, (16..=25).collect::<Vec<_>>());
    assert!(state.notifications.is_empty());
    assert!(state.detection_results.is_empty());
}

#[test]
fn document_carries_version_and_camel_case_fields() {
    let dir = tempfile::tempdir().unwrap();
    let (store, storage) = file_store(dir.path());
    store.update_settings(SettingsPatch {
        show_fps: Some(true),
        ..Default::default()
    });

    let text = fs::read_to_string(storage.path_for(STORE_NAMESPACE)).unwrap();
    let document: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(document["version"], CURRENT_VERSION);
    assert_eq!(document["settings"]["showFPS"], true);
    assert!(document["trainingData"].is_array());
    assert!(document["predictionHistory"].is_array());
}

#[test]
fn legacy_document_is_migrated_on_startup() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path());
    let legacy = json!({
        "version": 0,
        "settings": { "darkMode": false, "detectionFPS": 60 },
        "trainingData": [
            {
                "id": "old-1",
                "gestureId": "hola",
                "sequence": [],
                "duration": 1200,
                "timestamp": 1_650_000_000_000i64,
                "metadata": {}
            }
        ]
    });
    storage.write(STORE_NAMESPACE, &legacy.to_string()).unwrap();

    let (store, _) = file_store(dir.path());
    let state = store.snapshot();
    assert!(!state.settings.dark_mode);
    assert_eq!(state.settings.detection_fps, 30);
    assert!(state.settings.show_landmarks);
    assert_eq!(state.training_data.len(), 1);
    assert_eq!(state.training_data[0].metadata.quality, 1.0);
    assert_eq!(state.training_data[0].metadata.device_info, "unknown");
}

#[test]
fn corrupt_or_future_documents_start_from_defaults() {
    for contents in ["{{{ definitely not json", r#"{"version": 42, "settings": {"darkMode": false}}"#] {
        let dir = tempfile::tempdir().unwrap();
        FileStorage::new(dir.path()).write(STORE_NAMESPACE, contents).unwrap();

        let (store, _) = file_store(dir.path());
        assert_eq!(*store.snapshot().settings, Settings::default());
        assert!(store.snapshot().training_data.is_empty());
    }
}

#[test]
fn custom_namespace_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileStorage::new(dir.path()));
    let store = AppStore::builder().storage(storage.clone()).namespace("alt").build();
    store.reset_settings();
    assert!(storage.path_for("alt").exists());
    assert!(!storage.path_for(STORE_NAMESPACE).exists());
}
