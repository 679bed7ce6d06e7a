//! CLI enum types for capture mode and backend options.

use clap::ValueEnum;

use crate::device::BackendKind;
use crate::session::CaptureMode;

/// What to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Mode {
    #[default]
    Picture,
    Boomerang,
    Video,
}

impl From<Mode> for CaptureMode {
    fn from(m: Mode) -> Self {
        match m {
            Mode::Picture => CaptureMode::Picture,
            Mode::Boomerang => CaptureMode::Boomerang,
            Mode::Video => CaptureMode::Video,
        }
    }
}

/// Which camera backend to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Dslr,
    Webcam,
    Simulated,
}

impl From<Backend> for BackendKind {
    fn from(b: Backend) -> Self {
        match b {
            Backend::Dslr => BackendKind::Dslr,
            Backend::Webcam => BackendKind::Webcam,
            Backend::Simulated => BackendKind::Simulated,
        }
    }
}
