//! Timed capture sessions on top of a [`Device`](crate::device::Device).

mod boomerang;
mod manager;
mod state;

pub use boomerang::arrange_boomerang;
pub use manager::{ModeTiming, PreviewSink, SessionManager, SessionTimings};
pub use state::{Artifact, CaptureMode, SessionError, SessionHandle, SessionState};
