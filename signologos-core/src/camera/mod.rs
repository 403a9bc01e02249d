//! Camera lifecycle: `Idle -> Requesting -> Active`, `Requesting -> Error`,
//! `Active -> Idle`.

#[cfg(feature = "opencv-camera")]
mod opencv;
mod synthetic;

#[cfg(feature = "opencv-camera")]
pub use self::opencv::OpencvCaptureDevice;
pub use synthetic::SyntheticCaptureDevice;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::error::CameraError;
use crate::state::lock;
use crate::store::AppStore;
use crate::types::{CameraStatus, MediaConstraints, StreamInfo};

/// A live capture stream. Owned exclusively by [`CameraManager`].
pub trait VideoStream: Send {
    fn info(&self) -> StreamInfo;

    /// Stops every track. Calling it twice is harmless.
    fn stop_tracks(&mut self);
}

/// Source of capture streams (a V4L2 device, a browser bridge, a fake).
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn open(&self, constraints: &MediaConstraints) -> Result<Box<dyn VideoStream>, CameraError>;
}

pub struct CameraManager {
    store: AppStore,
    device: Arc<dyn CaptureDevice>,
    stream: Mutex<Option<Box<dyn VideoStream>>>,
    // Bumped by every start and stop; a device request only commits if no
    // other start or stop happened while it was in flight.
    generation: AtomicU64,
}

impl std::fmt::Debug for CameraManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraManager")
            .field("status", &self.status())
            .field("holds_stream", &lock(&self.stream).is_some())
            .finish()
    }
}

impl CameraManager {
    pub fn new(store: AppStore, device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            store,
            device,
            stream: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> CameraStatus {
        self.store.snapshot().camera.status()
    }

    /// Requests the device. A no-op while Active or Requesting.
    ///
    /// On failure the user-facing message is recorded in the camera state
    /// before the error is returned.
    pub async fn start(&self) -> Result<(), CameraError> {
        let request = self.store.update(|s| match s.camera.status() {
            CameraStatus::Active | CameraStatus::Requesting => None,
            CameraStatus::Idle | CameraStatus::Error => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let camera = s.camera_mut();
                camera.is_loading = true;
                camera.error = None;
                Some((generation, camera.constraints.clone()))
            }
        });

        let Some((generation, constraints)) = request else {
            debug!("Camera start ignored: already {:?}", self.status());
            return Ok(());
        };

        info!(
            "Requesting camera ({}x{} @ {} fps, {:?})",
            constraints.video.width,
            constraints.video.height,
            constraints.video.frame_rate,
            constraints.video.facing_mode
        );

        match self.device.open(&constraints).await {
            Ok(stream) => {
                let rejected = self.store.update(|s| {
                    if self.generation.load(Ordering::SeqCst) != generation
                        || s.camera.status() != CameraStatus::Requesting
                    {
                        return Some(stream);
                    }
                    let info = stream.info();
                    let mut held = lock(&self.stream);
                    if let Some(mut previous) = held.replace(stream) {
                        warn!("Replacing a stream that was still held");
                        previous.stop_tracks();
                    }
                    let camera = s.camera_mut();
                    camera.device_id = Some(info.id.clone());
                    camera.stream = Some(info);
                    camera.is_active = true;
                    camera.is_loading = false;
                    camera.error = None;
                    None
                });

                match rejected {
                    Some(mut stream) => {
                        info!("Camera request superseded; releasing late stream {}", stream.info().id);
                        stream.stop_tracks();
                    }
                    None => info!("Camera active"),
                }
                Ok(())
            }
            Err(e) => {
                warn!("Camera request failed: {}", e);
                self.store.update(|s| {
                    if self.generation.load(Ordering::SeqCst) == generation
                        && s.camera.status() == CameraStatus::Requesting
                    {
                        let camera = s.camera_mut();
                        camera.is_loading = false;
                        camera.error = Some(e.user_message());
                    }
                });
                Err(e)
            }
        }
    }

    /// Releases the stream and returns to Idle. A no-op when already Idle.
    pub fn stop(&self) {
        let released = self.store.update(|s| {
            let held = lock(&self.stream).take();
            if held.is_none() && s.camera.status() == CameraStatus::Idle {
                return None;
            }
            self.generation.fetch_add(1, Ordering::SeqCst);
            let camera = s.camera_mut();
            camera.is_active = false;
            camera.is_loading = false;
            camera.stream = None;
            camera.error = None;
            Some(held)
        });

        match released {
            None => debug!("Camera stop ignored: already idle"),
            Some(Some(mut stream)) => {
                stream.stop_tracks();
                info!("Camera stopped, released stream {}", stream.info().id);
            }
            Some(None) => info!("Camera returned to idle"),
        }
    }

    /// `stop()` followed by `start()`; the retry path after an error.
    pub async fn restart(&self) -> Result<(), CameraError> {
        self.stop();
        self.start().await
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        let held = lock(&self.stream).take();
        if let Some(mut stream) = held {
            stream.stop_tracks();
            self.store.update(|s| {
                let camera = s.camera_mut();
                camera.is_active = false;
                camera.stream = None;
            });
        }
    }
}
