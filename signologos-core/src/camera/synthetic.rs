use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use super::{CaptureDevice, VideoStream};
use crate::error::CameraError;
use crate::state::lock;
use crate::types::{MediaConstraints, StreamInfo};

/// Capture device that produces no pixels. Streams honour the requested
/// constraints, and the device counts how many are open so callers can check
/// that at most one is held.
#[derive(Debug, Default)]
pub struct SyntheticCaptureDevice {
    latency: Duration,
    failure: Mutex<Option<CameraError>>,
    open_streams: Arc<AtomicUsize>,
    opened_total: AtomicUsize,
}

impl SyntheticCaptureDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Makes every following request fail with `failure` (or succeed on `None`).
    pub fn fail_with(&self, failure: Option<CameraError>) {
        *lock(&self.failure) = failure;
    }

    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureDevice for SyntheticCaptureDevice {
    async fn open(&self, constraints: &MediaConstraints) -> Result<Box<dyn VideoStream>, CameraError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let failure = lock(&self.failure).clone();
        if let Some(err) = failure {
            return Err(err);
        }

        let serial = self.opened_total.fetch_add(1, Ordering::SeqCst) + 1;
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        let info = StreamInfo {
            id: format!("synthetic-{}", serial),
            label: "Synthetic camera".to_string(),
            width: constraints.video.width,
            height: constraints.video.height,
            frame_rate: constraints.video.frame_rate,
        };
        debug!("Opened synthetic stream {}", info.id);

        Ok(Box::new(SyntheticStream {
            info,
            open_streams: self.open_streams.clone(),
            live: true,
        }))
    }
}

struct SyntheticStream {
    info: StreamInfo,
    open_streams: Arc<AtomicUsize>,
    live: bool,
}

impl VideoStream for SyntheticStream {
    fn info(&self) -> StreamInfo {
        self.info.clone()
    }

    fn stop_tracks(&mut self) {
        if self.live {
            self.live = false;
            self.open_streams.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}
