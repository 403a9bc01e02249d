use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use signologos_core::types::{CameraStatus, ModelStatus};
use signologos_core::{
    select, AppStore, CameraError, CameraManager, DetectionResult, ImportError, ModelManager, PlaceholderModel,
    SettingsPatch, SyntheticCaptureDevice, TrainingSample,
};

fn detection(ts: i64) -> DetectionResult {
    DetectionResult {
        hands: Vec::new(),
        timestamp: ts,
        frame_id: ts as u64,
    }
}

#[test]
fn hundred_and_one_detections_keep_the_newest_hundred() {
    let store = AppStore::builder().build();
    for ts in 1..=101 {
        store.add_detection_result(detection(ts)).unwrap();
    }
    let state = store.snapshot();
    assert_eq!(state.detection_results.len(), 100);
    let stamps: Vec<i64> = state.detection_results.iter().map(|d| d.timestamp).collect();
    assert_eq!(stamps, (2..=101).collect::<Vec<_>>());

    store.clear_detection_results();
    assert!(store.snapshot().detection_results.is_empty());
}

#[test]
fn configured_capacities_are_honoured() {
    let store = AppStore::builder().capacities(5, 3).build();
    for ts in 0..10 {
        store.add_detection_result(detection(ts)).unwrap();
    }
    assert_eq!(store.snapshot().detection_results.len(), 5);
    assert_eq!(store.snapshot().prediction_history.capacity(), 3);
}

#[test]
fn detection_fps_is_clamped() {
    let store = AppStore::builder().build();
    let settings = store.update_settings(SettingsPatch {
        detection_fps: Some(45),
        ..Default::default()
    });
    assert_eq!(settings.detection_fps, 30);
}

#[test]
fn import_with_one_malformed_sample() {
    let store = AppStore::builder().build();
    store.add_training_data(TrainingSample::capture("A", Vec::new(), 1000, "test", 1.0));

    let sample = |id: &str| {
        json!({
            "id": id,
            "gestureId": "hola",
            "sequence": [[{ "x": 0.1, "y": 0.2, "z": 0.0 }]],
            "duration": 900,
            "timestamp": 1_700_000_000_000i64,
            "metadata": { "deviceInfo": "phone", "quality": 0.8 }
        })
    };
    let document = json!({
        "version": "1.0.0",
        "timestamp": 1_700_000_000_000i64,
        "trainingData": [sample("x1"), sample("x2"), { "gestureId": 7 }, sample("x3")],
        "totalSamples": 4
    });

    let report = store.import_training_data(&document.to_string());
    assert_eq!(report.imported, 3);
    assert_eq!(report.errors.len(), 1);
    assert!(matches!(report.errors[0], ImportError::InvalidEntry { index: 2, .. }));
    assert_eq!(store.snapshot().training_data.len(), 4);
}

#[test]
fn import_accepts_samples_alias_and_rejects_garbage() {
    let store = AppStore::builder().build();
    let export = {
        let source = AppStore::builder().build();
        source.add_training_data(TrainingSample::capture("A", Vec::new(), 1000, "test", 1.0));
        source.export_training_data()
    };
    let aliased = json!({ "samples": export.training_data });
    assert_eq!(store.import_training_data(&aliased.to_string()).imported, 1);

    let report = store.import_training_data("[1, 2, 3]");
    assert_eq!(report.errors, vec![ImportError::MissingSamples]);
    assert_eq!(store.snapshot().training_data.len(), 1);
}

#[test]
fn subscribers_see_updates_in_order() {
    let store = AppStore::builder().build();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = store.subscribe(select::detection_results, move |buffer| {
        sink.lock().unwrap().push(buffer.latest().map(|d| d.timestamp));
    });
    for ts in 1..=3 {
        store.add_detection_result(detection(ts)).unwrap();
    }
    store.clear_detection_results();
    assert_eq!(*seen.lock().unwrap(), vec![Some(1), Some(2), Some(3), None]);
}

#[tokio::test]
async fn camera_stop_is_idempotent_and_start_while_active_is_a_no_op() {
    let device = Arc::new(SyntheticCaptureDevice::new());
    let store = AppStore::builder().build();
    let camera = CameraManager::new(store.clone(), device.clone());

    let changes = Arc::new(AtomicUsize::new(0));
    let counter = changes.clone();
    let _sub = store.subscribe(select::camera, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    camera.start().await.unwrap();
    let stream = store.snapshot().camera.stream.clone();
    camera.start().await.unwrap();
    assert_eq!(store.snapshot().camera.stream, stream);
    assert_eq!(device.opened_total(), 1);

    camera.stop();
    let after_first_stop = changes.load(Ordering::SeqCst);
    camera.stop();
    assert_eq!(changes.load(Ordering::SeqCst), after_first_stop);
    assert_eq!(camera.status(), CameraStatus::Idle);
    assert_eq!(device.open_streams(), 0);
}

#[tokio::test]
async fn camera_unavailable_reports_detail() {
    let device = Arc::new(SyntheticCaptureDevice::new());
    device.fail_with(Some(CameraError::DeviceUnavailable("no /dev/video0".into())));
    let store = AppStore::builder().build();
    let camera = CameraManager::new(store.clone(), device);

    assert!(camera.start().await.is_err());
    let state = store.snapshot();
    assert_eq!(state.camera.status(), CameraStatus::Error);
    assert_eq!(state.camera.error.as_deref(), Some("No camera available: no /dev/video0"));

    camera.stop();
    assert_eq!(store.snapshot().camera.status(), CameraStatus::Idle);
    assert!(store.snapshot().camera.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn camera_and_model_share_one_store() {
    let store = AppStore::builder().build();
    let camera = CameraManager::new(store.clone(), Arc::new(SyntheticCaptureDevice::with_latency(Duration::from_millis(300))));
    let model = ModelManager::new(store.clone(), Arc::new(PlaceholderModel::new(Duration::from_millis(2000))));

    let (camera_started, model_loaded) = tokio::join!(camera.start(), model.load());
    camera_started.unwrap();
    model_loaded.unwrap();

    let state = store.snapshot();
    assert_eq!(state.camera.status(), CameraStatus::Active);
    assert_eq!(state.model.status(), ModelStatus::Loaded);
    assert_eq!(state.model.model_version, "1.0.0");
}

#[tokio::test(start_paused = true)]
async fn concurrent_starts_open_one_stream() {
    let device = Arc::new(SyntheticCaptureDevice::with_latency(Duration::from_millis(100)));
    let camera = CameraManager::new(AppStore::builder().build(), device.clone());

    let (a, b) = tokio::join!(camera.start(), camera.start());
    a.unwrap();
    b.unwrap();
    assert_eq!(device.opened_total(), 1);
    assert_eq!(device.open_streams(), 1);
    assert_eq!(camera.status(), CameraStatus::Active);
}
