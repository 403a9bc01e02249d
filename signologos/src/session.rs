use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use signologos_core::{
    select, ActionKind, AppStore, CameraManager, CaptureDevice, CoordinatorConfig, DetectionResult, ModelManager,
    NewNotification, PlaceholderModel, Subscription, SyntheticCaptureDevice,
};

/// Runs detection until Ctrl-C or until `seconds` elapse.
///
/// Landmark extraction is an external detector; frames recorded here carry no
/// hands, which is enough to drive the detection window and the inference
/// cadence end to end.
pub async fn run(store: AppStore, config: &CoordinatorConfig, seconds: Option<u64>, train: bool) -> Result<()> {
    let _hooks = install_hooks(&store);

    let camera = CameraManager::new(store.clone(), capture_device(config));
    let model = ModelManager::new(
        store.clone(),
        Arc::new(PlaceholderModel::new(Duration::from_millis(config.model.placeholder_load_delay_ms))),
    );

    store.set_loading(true);
    let started = tokio::try_join!(
        async { camera.start().await.context("Camera unavailable") },
        async { model.load().await.context("Model failed to load") },
    );
    store.set_loading(false);
    started?;

    if train {
        let samples = store.snapshot().training_data.clone();
        if samples.is_empty() {
            warn!("No training samples stored; skipping training");
        } else {
            let report = model.train(&samples).await.context("Training failed")?;
            store.add_notification(NewNotification::success(
                "Training finished",
                &format!("Trained on {} samples", samples.len()),
            ));
            debug!("Training report: {:?}", report);
        }
    }

    let outcome = detect(&store, &model, config.model.sequence_length, seconds).await;
    camera.stop();
    store.clear_detection_results();
    outcome
}

async fn detect(store: &AppStore, model: &ModelManager, window: usize, seconds: Option<u64>) -> Result<()> {
    let deadline = seconds.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
    let window = window.max(1);
    let mut frame_id = 0u64;
    let mut last_gesture: Option<String> = None;

    info!("Detecting (window of {} frames); press Ctrl-C to stop", window);
    loop {
        let interval = store.snapshot().settings.detection_interval();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
            _ = sleep_until(deadline) => {
                info!("Session time elapsed");
                return Ok(());
            }
            _ = tokio::time::sleep(interval) => {}
        }

        frame_id += 1;
        let frame = DetectionResult {
            hands: Vec::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            frame_id,
        };
        if store.add_detection_result(frame).is_err() {
            continue;
        }

        let frames = store.snapshot().detection_results.last(window);
        if frames.len() < window {
            continue;
        }

        match model.infer(&frames).await {
            Ok(Some(prediction)) => {
                if last_gesture.as_deref() != Some(prediction.gesture_id.as_str()) {
                    println!(
                        "{} ({:.0}%)",
                        prediction.gesture_id,
                        prediction.confidence * 100.0
                    );
                    last_gesture = Some(prediction.gesture_id);
                }
            }
            Ok(None) => last_gesture = None,
            Err(e) => debug!("Inference skipped: {}", e),
        }
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn capture_device(config: &CoordinatorConfig) -> Arc<dyn CaptureDevice> {
    #[cfg(feature = "opencv-camera")]
    {
        match signologos_core::OpencvCaptureDevice::from_path(&config.camera.device) {
            Some(device) => return Arc::new(device),
            None => warn!("Unrecognized camera device {}, using the synthetic camera", config.camera.device),
        }
    }
    #[cfg(not(feature = "opencv-camera"))]
    debug!("Built without OpenCV; {} is not used", config.camera.device);

    Arc::new(SyntheticCaptureDevice::new())
}

/// Turns camera and model errors into notifications and prints each
/// notification once. Dropping the returned subscriptions detaches them.
fn install_hooks(store: &AppStore) -> Vec<Subscription> {
    let mut hooks = Vec::new();

    let notify = store.clone();
    let last_camera_error = Mutex::new(None::<String>);
    hooks.push(store.subscribe(select::camera, move |camera| {
        let mut last = last_camera_error.lock().unwrap_or_else(|p| p.into_inner());
        if camera.error != *last {
            last.clone_from(&camera.error);
            if let Some(message) = &camera.error {
                notify.add_notification(
                    NewNotification::error("Camera", message).with_action("Retry", ActionKind::RetryCamera),
                );
            }
        }
    }));

    let notify = store.clone();
    let last_model_error = Mutex::new(None::<String>);
    hooks.push(store.subscribe(select::model, move |model| {
        let mut last = last_model_error.lock().unwrap_or_else(|p| p.into_inner());
        if model.error != *last {
            last.clone_from(&model.error);
            if let Some(message) = &model.error {
                notify.add_notification(
                    NewNotification::error("Model", message).with_action("Reload", ActionKind::ReloadModel),
                );
            }
        }
    }));

    let shown = Mutex::new(HashSet::new());
    hooks.push(store.subscribe(select::notifications, move |notifications| {
        let mut shown = shown.lock().unwrap_or_else(|p| p.into_inner());
        shown.retain(|id| notifications.iter().any(|n| &n.id == id));
        for notification in notifications.iter() {
            if shown.insert(notification.id.clone()) {
                eprintln!(
                    "[{:?}] {}: {}",
                    notification.kind, notification.title, notification.message
                );
            }
        }
    }));

    hooks
}
