use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture, CAP_V4L2},
};
use async_trait::async_trait;
use log::{info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use super::{CaptureDevice, VideoStream};
use crate::error::CameraError;
use crate::types::{MediaConstraints, StreamInfo};

/// V4L2 capture through OpenCV.
#[derive(Debug, Clone)]
pub struct OpencvCaptureDevice {
    device_id: i32,
}

impl OpencvCaptureDevice {
    pub fn new(device_id: i32) -> Self {
        Self { device_id }
    }

    /// Parses `/dev/videoN` (or a bare index) into a device.
    pub fn from_path(path: &str) -> Option<Self> {
        path.trim_start_matches("/dev/video")
            .parse()
            .ok()
            .map(Self::new)
    }

    fn device_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/video{}", self.device_id))
    }

    fn camera_name(&self) -> String {
        let path = format!("/sys/class/video4linux/video{}/name", self.device_id);
        fs::read_to_string(&path)
            .unwrap_or_else(|_| format!("video{}", self.device_id))
            .trim()
            .to_string()
    }

    fn open_blocking(&self, constraints: &MediaConstraints) -> Result<OpencvStream, CameraError> {
        let path = self.device_path();
        if let Err(e) = fs::File::open(&path) {
            return Err(match e.kind() {
                ErrorKind::PermissionDenied => CameraError::PermissionDenied(format!("{:?}: {}", path, e)),
                _ => CameraError::DeviceUnavailable(format!("{:?}: {}", path, e)),
            });
        }

        let unavailable = |e: opencv::Error| CameraError::DeviceUnavailable(e.to_string());

        let mut capture = VideoCapture::new(self.device_id, CAP_V4L2).map_err(unavailable)?;
        if !capture.is_opened().unwrap_or(false) {
            return Err(CameraError::DeviceUnavailable(format!("video{} failed to open", self.device_id)));
        }

        let video = &constraints.video;
        capture.set(videoio::CAP_PROP_FRAME_WIDTH, f64::from(video.width)).ok();
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, f64::from(video.height)).ok();
        capture.set(videoio::CAP_PROP_FPS, f64::from(video.frame_rate)).ok();

        // Some nodes open fine but never deliver frames (metadata devices).
        let mut test_frame = Mat::default();
        if capture.read(&mut test_frame).is_err() || test_frame.empty() {
            let _ = capture.release();
            return Err(CameraError::DeviceUnavailable(format!(
                "video{} opened but couldn't read frames",
                self.device_id
            )));
        }

        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(f64::from(video.width));
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(f64::from(video.height));
        let fps = capture.get(videoio::CAP_PROP_FPS).unwrap_or(f64::from(video.frame_rate));

        let info = StreamInfo {
            id: format!("video{}", self.device_id),
            label: self.camera_name(),
            width: width as u32,
            height: height as u32,
            frame_rate: fps.round() as u32,
        };
        info!("Opened {} ({}x{} @ {} fps)", info.label, info.width, info.height, info.frame_rate);

        Ok(OpencvStream {
            capture: Some(capture),
            info,
        })
    }
}

#[async_trait]
impl CaptureDevice for OpencvCaptureDevice {
    async fn open(&self, constraints: &MediaConstraints) -> Result<Box<dyn VideoStream>, CameraError> {
        let device = self.clone();
        let constraints = constraints.clone();
        let stream = tokio::task::spawn_blocking(move || device.open_blocking(&constraints))
            .await
            .map_err(|e| CameraError::DeviceUnavailable(format!("camera worker failed: {}", e)))??;
        Ok(Box::new(stream))
    }
}

struct OpencvStream {
    capture: Option<VideoCapture>,
    info: StreamInfo,
}

impl VideoStream for OpencvStream {
    fn info(&self) -> StreamInfo {
        self.info.clone()
    }

    fn stop_tracks(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                warn!("Failed to release {}: {}", self.info.id, e);
            }
        }
    }
}

impl Drop for OpencvStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}
