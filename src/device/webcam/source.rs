//! Driver-managed video source seam.

use crate::device::types::{Frame, StreamInfo, WebcamSettings};

/// Errors reported by a webcam driver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Camera permission denied (macOS)
    #[error("Camera permission denied")]
    PermissionDenied,

    /// Device is opened by another process
    #[error("Camera busy: {0}")]
    Busy(String),

    #[error("Failed to open camera: {0}")]
    OpenFailed(String),

    #[error("Failed to read frame: {0}")]
    ReadFailed(String),
}

/// A camera the OS driver manages for us.
pub trait VideoSource {
    /// Open the stream, asking for the given profile. Returns what the
    /// driver actually negotiated.
    fn open(&mut self, settings: &WebcamSettings) -> Result<StreamInfo, SourceError>;

    /// Read the current live frame.
    fn read(&mut self) -> Result<Frame, SourceError>;

    /// Close the stream. Safe to call when not open.
    fn close(&mut self);
}
