//! nokhwa-backed webcam source.

use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat as NokhwaFrameFormat, RequestedFormat,
    RequestedFormatType,
};
use nokhwa::Camera;
use std::time::Instant;

use super::source::{SourceError, VideoSource};
use crate::device::types::{Frame, Resolution, StreamInfo, WebcamSettings};

/// [`VideoSource`] over the platform camera API.
#[derive(Default)]
pub struct NokhwaSource {
    camera: Option<Camera>,
}

impl NokhwaSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VideoSource for NokhwaSource {
    fn open(&mut self, settings: &WebcamSettings) -> Result<StreamInfo, SourceError> {
        self.close();

        let index = CameraIndex::Index(settings.device_index);
        let mut camera = open_camera_with_fallback(&index, settings)?;
        camera
            .open_stream()
            .map_err(|e| classify_open_error(e.to_string()))?;

        let res = camera.resolution();
        let info = StreamInfo {
            resolution: Resolution {
                width: res.width(),
                height: res.height(),
            },
            fps: camera.frame_rate(),
        };
        self.camera = Some(camera);
        Ok(info)
    }

    fn read(&mut self) -> Result<Frame, SourceError> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| SourceError::ReadFailed("stream not open".to_string()))?;
        let buffer = camera
            .frame()
            .map_err(|e| SourceError::ReadFailed(e.to_string()))?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| SourceError::ReadFailed(e.to_string()))?;
        let resolution = buffer.resolution();

        Ok(Frame::new(
            resolution.width(),
            resolution.height(),
            decoded.into_raw(),
            Instant::now(),
        ))
    }

    fn close(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            let _ = camera.stop_stream();
        }
    }
}

/// Try MJPEG at the requested profile first, then let the driver choose.
fn open_camera_with_fallback(
    index: &CameraIndex,
    settings: &WebcamSettings,
) -> Result<Camera, SourceError> {
    let requested_resolution =
        nokhwa::utils::Resolution::new(settings.resolution.width, settings.resolution.height);
    let format_attempts = [
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(CameraFormat::new(
            requested_resolution,
            NokhwaFrameFormat::MJPEG,
            settings.fps,
        ))),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(CameraFormat::new(
            requested_resolution,
            NokhwaFrameFormat::YUYV,
            settings.fps,
        ))),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution),
    ];

    let mut last_error = String::from("no format attempted");
    for requested in format_attempts {
        match Camera::new(index.clone(), requested) {
            Ok(cam) => return Ok(cam),
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(classify_open_error(last_error))
}

fn classify_open_error(msg: String) -> SourceError {
    let lower = msg.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("authorization")
    {
        SourceError::PermissionDenied
    } else if lower.contains("busy") || lower.contains("in use") {
        SourceError::Busy(msg)
    } else {
        SourceError::OpenFailed(msg)
    }
}
