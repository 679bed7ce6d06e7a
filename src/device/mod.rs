//! Capture device abstraction and its backends.
//!
//! Every backend implements [`Device`], the capability set the session
//! manager drives:
//! - DSLR over a vendor protocol via [`DslrCamera`]
//! - Local webcam via [`WebcamCamera`]
//! - Hardware-free test pattern via [`SimulatedCamera`]

mod error;
mod frame_utils;
mod types;

pub mod dslr;
pub mod simulated;
pub mod webcam;

use std::path::PathBuf;
use std::time::Duration;

use crate::session::CaptureMode;

pub use dslr::DslrCamera;
pub use error::{CaptureError, InitError, RecordingError};
pub use simulated::SimulatedCamera;
pub use types::{BackendKind, Frame, FrameFormat, Resolution, StreamInfo, WebcamSettings};
pub use webcam::WebcamCamera;

/// Capability set shared by all capture backends.
///
/// A device is exclusively owned by one caller at a time. It is never read
/// from after [`Device::release`], and `release` is always safe to repeat.
pub trait Device {
    /// Hardware family of this device.
    fn kind(&self) -> BackendKind;

    /// Bring the device up. Calling this on an initialized device is a
    /// no-op success.
    fn initialize(&mut self) -> Result<(), InitError>;

    fn is_initialized(&self) -> bool;

    /// Grab one live frame, cheap enough to call at preview rates.
    fn capture_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Whether [`Device::capture_still`] takes a full-resolution picture.
    fn supports_native_still(&self) -> bool {
        false
    }

    /// Take one full-resolution picture and return where it was stored.
    fn capture_still(&mut self) -> Result<PathBuf, CaptureError> {
        Err(CaptureError::Unsupported)
    }

    /// Whether the device produces its own video file between
    /// `start_recording` and `stop_recording`.
    fn supports_native_recording(&self) -> bool {
        false
    }

    /// Fails if a recording is already running.
    fn start_recording(&mut self) -> Result<(), RecordingError>;

    /// Finish the recording and return its file, or `None` when nothing
    /// was recorded. Stopping while idle returns `Ok(None)`.
    fn stop_recording(&mut self) -> Result<Option<PathBuf>, RecordingError>;

    fn is_recording(&self) -> bool;

    /// Time since `start_recording`, zero when idle.
    fn recording_duration(&self) -> Duration;

    /// Stop any recording, then free the hardware. Idempotent.
    fn release(&mut self);
}

/// Hands out a fresh device for each session.
pub trait DeviceFactory {
    fn acquire(&mut self, mode: CaptureMode) -> Box<dyn Device>;
}

impl<F> DeviceFactory for F
where
    F: FnMut(CaptureMode) -> Box<dyn Device>,
{
    fn acquire(&mut self, mode: CaptureMode) -> Box<dyn Device> {
        self(mode)
    }
}
