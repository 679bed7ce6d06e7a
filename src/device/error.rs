//! Error types shared by every device backend.

/// Why a device could not be brought up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("Camera did not respond after {attempts} attempt(s)")]
    Unresponsive {
        /// Number of initialization attempts made before giving up
        attempts: u32,
    },

    #[error("Camera is held by another process: {0}")]
    DriverBusy(String),
}

/// Why a single frame could not be captured.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("Camera is not initialized")]
    NotInitialized,

    #[error("Camera transport failed: {0}")]
    TransportFailure(String),

    #[error("Operation not supported by this backend")]
    Unsupported,
}

/// Why a recording could not be started or finalized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordingError {
    #[error("Camera is not initialized")]
    NotInitialized,

    #[error("Recording already in progress")]
    AlreadyRecording,

    #[error("Failed to write recording: {0}")]
    WriteFailure(String),
}
