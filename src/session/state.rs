//! Session states, failures and artifacts.

use std::fmt;
use std::path::PathBuf;

use crate::device::{CaptureError, Frame, InitError, RecordingError};

/// What the operator asked to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureMode {
    /// A single still
    Picture,
    /// A short forward-reverse-forward loop
    Boomerang,
    Video,
}

impl CaptureMode {
    pub const ALL: [CaptureMode; 3] = [
        CaptureMode::Picture,
        CaptureMode::Boomerang,
        CaptureMode::Video,
    ];
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::Picture => write!(f, "picture"),
            CaptureMode::Boomerang => write!(f, "boomerang"),
            CaptureMode::Video => write!(f, "video"),
        }
    }
}

/// Opaque identifier of one capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub(crate) u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session #{}", self.0)
    }
}

/// Why a session ended in [`SessionState::Failed`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("Camera initialization failed: {0}")]
    Init(#[from] InitError),

    #[error("Capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("Recording failed: {0}")]
    Recording(#[from] RecordingError),

    /// The capture window closed without producing any data
    #[error("Nothing was captured")]
    EmptyCapture,
}

/// Observable state of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Initializing,
    /// Live preview during the lead-in
    Previewing,
    Capturing(CaptureMode),
    Completed,
    Failed(SessionError),
}

impl SessionState {
    /// True for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Initializing => write!(f, "initializing"),
            SessionState::Previewing => write!(f, "previewing"),
            SessionState::Capturing(mode) => write!(f, "capturing {}", mode),
            SessionState::Completed => write!(f, "completed"),
            SessionState::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Result of a completed session, handed to review and save.
#[derive(Debug, Clone)]
pub enum Artifact {
    /// One still taken from the live feed
    Picture(Frame),
    /// Ordered frames of a boomerang or buffered video
    Frames(Vec<Frame>),
    /// A file the device wrote (native still or recording)
    File(PathBuf),
}

impl Artifact {
    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            Artifact::Picture(frame) => format!("picture {}", frame.resolution()),
            Artifact::Frames(frames) => format!("{} frames", frames.len()),
            Artifact::File(path) => format!("file {}", path.display()),
        }
    }
}
