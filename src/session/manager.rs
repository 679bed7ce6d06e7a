//! Capture session state machine.
//!
//! One session is live at a time and owns its device exclusively. The
//! caller drives it with [`SessionManager::poll_tick`]; each tick is one
//! capture plus at most one state transition:
//!
//! ```text
//! Idle -> Initializing -> Previewing -> Capturing(mode) -> Completed
//!              |               |              |
//!              +---------------+--------------+----------> Failed
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::boomerang::arrange_boomerang;
use super::state::{Artifact, CaptureMode, SessionError, SessionHandle, SessionState};
use crate::clock::{Clock, SessionClock};
use crate::device::{CaptureError, Device, DeviceFactory, Frame, RecordingError};

/// Lead-in and total length of one capture mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTiming {
    /// Frames captured before this are discarded
    pub lead_in: Duration,
    /// Counted from the start of the session, lead-in included
    pub duration: Duration,
}

impl ModeTiming {
    pub const fn from_millis(lead_in_ms: u64, duration_ms: u64) -> Self {
        Self {
            lead_in: Duration::from_millis(lead_in_ms),
            duration: Duration::from_millis(duration_ms),
        }
    }
}

/// Timing for every capture mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    pub picture: ModeTiming,
    pub boomerang: ModeTiming,
    pub video: ModeTiming,
}

impl SessionTimings {
    pub fn for_mode(&self, mode: CaptureMode) -> ModeTiming {
        match mode {
            CaptureMode::Picture => self.picture,
            CaptureMode::Boomerang => self.boomerang,
            CaptureMode::Video => self.video,
        }
    }
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            picture: ModeTiming::from_millis(3000, 3000),
            boomerang: ModeTiming::from_millis(0, 2000),
            video: ModeTiming::from_millis(3000, 10_000),
        }
    }
}

/// Receives every live frame, e.g. to draw the preview.
pub trait PreviewSink {
    fn show(&mut self, frame: &Frame);
}

impl<F> PreviewSink for F
where
    F: FnMut(&Frame),
{
    fn show(&mut self, frame: &Frame) {
        self(frame)
    }
}

struct Session {
    handle: SessionHandle,
    mode: CaptureMode,
    state: SessionState,
    /// `None` once released
    device: Option<Box<dyn Device>>,
    clock: Option<SessionClock>,
    /// Boomerang and buffered video frames, append-only until terminal
    buffer: Vec<Frame>,
    /// Latest post-lead-in frame of a picture session
    last_frame: Option<Frame>,
    /// The device itself is recording the video
    native_recording: bool,
    artifact: Option<Artifact>,
    cancel: CancellationToken,
}

impl Session {
    fn new(handle: SessionHandle, mode: CaptureMode, device: Box<dyn Device>) -> Self {
        Self {
            handle,
            mode,
            state: SessionState::Initializing,
            device: Some(device),
            clock: None,
            buffer: Vec::new(),
            last_frame: None,
            native_recording: false,
            artifact: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Advance one step. Returns the frame captured on this tick, if any.
    fn tick(&mut self, clock: &dyn Clock, timings: &SessionTimings) -> Option<Frame> {
        match self.state {
            SessionState::Initializing => {
                self.start(clock, timings.for_mode(self.mode));
                None
            }
            SessionState::Previewing | SessionState::Capturing(_) => self.step(clock),
            _ => None,
        }
    }

    fn start(&mut self, clock: &dyn Clock, timing: ModeTiming) {
        let Some(device) = self.device.as_mut() else {
            self.fail(CaptureError::NotInitialized.into());
            return;
        };
        match device.initialize() {
            Ok(()) => {
                let session_clock = SessionClock::new(clock.now(), timing.lead_in, timing.duration);
                self.clock = Some(session_clock);
                self.transition(SessionState::Previewing);
            }
            Err(e) => self.fail(e.into()),
        }
    }

    fn step(&mut self, clock: &dyn Clock) -> Option<Frame> {
        let session_clock = self.clock?;
        let now = clock.now();

        if self.state == SessionState::Previewing && session_clock.lead_in_elapsed(now) {
            if let Err(e) = self.begin_capture() {
                self.fail(e);
                return None;
            }
        }

        let frame = match self.capture_with_recovery() {
            Ok(frame) => frame,
            Err(e) => {
                self.fail(e);
                return None;
            }
        };

        if matches!(self.state, SessionState::Capturing(_)) {
            self.store(frame.clone());
        }
        if session_clock.expired(now) {
            self.finalize();
        }
        Some(frame)
    }

    fn begin_capture(&mut self) -> Result<(), SessionError> {
        if self.mode == CaptureMode::Video {
            if let Some(device) = self
                .device
                .as_mut()
                .filter(|d| d.supports_native_recording())
            {
                device.start_recording()?;
                self.native_recording = true;
            }
        }
        self.transition(SessionState::Capturing(self.mode));
        Ok(())
    }

    /// One capture, with a single release/initialize/retry on failure.
    ///
    /// A native recording cannot survive a reinitialize without splitting
    /// into two files, so a failure while recording ends the session and
    /// deletes what was recorded so far.
    fn capture_with_recovery(&mut self) -> Result<Frame, SessionError> {
        let handle = self.handle;
        let device = self
            .device
            .as_mut()
            .ok_or(SessionError::Capture(CaptureError::NotInitialized))?;

        let error = match device.capture_frame() {
            Ok(frame) => return Ok(frame),
            Err(e) => e,
        };

        if device.is_recording() {
            log::error!(
                "{}: capture failed while recording ({}), discarding partial recording",
                handle,
                error
            );
            self.native_recording = false;
            match device.stop_recording() {
                Ok(Some(path)) => discard_partial(&path),
                Ok(None) => {}
                Err(e) => log::warn!("{}: could not stop partial recording: {}", handle, e),
            }
            return Err(error.into());
        }

        log::warn!(
            "{}: capture failed ({}), reinitializing {} device",
            handle,
            error,
            device.kind()
        );
        device.release();
        device.initialize()?;
        Ok(device.capture_frame()?)
    }

    fn store(&mut self, frame: Frame) {
        match self.mode {
            CaptureMode::Picture => self.last_frame = Some(frame),
            CaptureMode::Boomerang => self.buffer.push(frame),
            CaptureMode::Video if !self.native_recording => self.buffer.push(frame),
            CaptureMode::Video => {}
        }
    }

    fn finalize(&mut self) {
        let result = match self.mode {
            CaptureMode::Picture => self.finish_picture(),
            CaptureMode::Boomerang => self.finish_boomerang(),
            CaptureMode::Video => self.finish_video(),
        };

        match result {
            Ok(artifact) => {
                log::info!("{} produced {}", self.handle, artifact.describe());
                self.release_device();
                self.buffer.clear();
                self.last_frame = None;
                self.artifact = Some(artifact);
                self.transition(SessionState::Completed);
                self.cancel.cancel();
            }
            Err(e) => self.fail(e),
        }
    }

    fn finish_picture(&mut self) -> Result<Artifact, SessionError> {
        if let Some(device) = self
            .device
            .as_mut()
            .filter(|d| d.supports_native_still())
        {
            match device.capture_still() {
                Ok(path) => return Ok(Artifact::File(path)),
                Err(e) => log::warn!(
                    "{}: full-resolution still failed ({}), using last preview frame",
                    self.handle,
                    e
                ),
            }
        }

        self.last_frame.take().map(Artifact::Picture).ok_or_else(|| {
            CaptureError::TransportFailure("no frame captured after lead-in".to_string()).into()
        })
    }

    fn finish_boomerang(&mut self) -> Result<Artifact, SessionError> {
        if self.buffer.is_empty() {
            return Err(SessionError::EmptyCapture);
        }
        Ok(Artifact::Frames(arrange_boomerang(&self.buffer)))
    }

    fn finish_video(&mut self) -> Result<Artifact, SessionError> {
        if self.native_recording {
            self.native_recording = false;
            let device = self
                .device
                .as_mut()
                .ok_or(SessionError::Recording(RecordingError::NotInitialized))?;
            return match device.stop_recording()? {
                Some(path) => Ok(Artifact::File(path)),
                None => Err(SessionError::EmptyCapture),
            };
        }

        if self.buffer.is_empty() {
            return Err(SessionError::EmptyCapture);
        }
        Ok(Artifact::Frames(std::mem::take(&mut self.buffer)))
    }

    /// Discard everything captured so far and end in `Failed`.
    fn fail(&mut self, error: SessionError) {
        log::error!("{} failed: {}", self.handle, error);
        self.buffer.clear();
        self.last_frame = None;
        self.release_device();
        self.transition(SessionState::Failed(error));
        self.cancel.cancel();
    }

    fn cancel(&mut self) {
        if !self.state.is_terminal() {
            log::info!("{} cancelled while {}", self.handle, self.state);
        }
        self.buffer.clear();
        self.last_frame = None;
        self.release_device();
        self.cancel.cancel();
    }

    fn release_device(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.release();
        }
    }

    fn transition(&mut self, next: SessionState) {
        log::info!("{}: {} -> {}", self.handle, self.state, next);
        self.state = next;
    }
}

fn discard_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::info!("Deleted partial recording {}", path.display()),
        Err(e) => log::warn!("Failed to delete partial recording {}: {}", path.display(), e),
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release_device();
        self.cancel.cancel();
    }
}

/// Owns the active capture session and the device it drives.
pub struct SessionManager {
    factory: Box<dyn DeviceFactory>,
    clock: Arc<dyn Clock>,
    timings: SessionTimings,
    preview: Option<Box<dyn PreviewSink>>,
    next_id: u64,
    current: Option<Session>,
}

impl SessionManager {
    pub fn new(
        factory: Box<dyn DeviceFactory>,
        clock: Arc<dyn Clock>,
        timings: SessionTimings,
    ) -> Self {
        Self {
            factory,
            clock,
            timings,
            preview: None,
            next_id: 0,
            current: None,
        }
    }

    /// Push every live frame to `sink`.
    pub fn with_preview(mut self, sink: Box<dyn PreviewSink>) -> Self {
        self.preview = Some(sink);
        self
    }

    pub fn timings(&self) -> &SessionTimings {
        &self.timings
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Start a new session in `Initializing`.
    ///
    /// Any session still running is cancelled first, so its device is
    /// released before the new one is acquired.
    pub fn begin_session(&mut self, mode: CaptureMode) -> SessionHandle {
        if let Some(mut previous) = self.current.take() {
            previous.cancel();
        }

        self.next_id += 1;
        let handle = SessionHandle(self.next_id);
        let device = self.factory.acquire(mode);
        log::info!("{}: {} on {} device", handle, mode, device.kind());

        self.current = Some(Session::new(handle, mode, device));
        handle
    }

    /// Drop the session and release its device. Unknown handles are ignored.
    pub fn cancel_session(&mut self, handle: SessionHandle) {
        if self.session(handle).is_some() {
            if let Some(mut session) = self.current.take() {
                session.cancel();
            }
        }
    }

    /// Advance the session by one tick and report its state.
    ///
    /// Terminal sessions are not advanced further. Unknown, cancelled and
    /// consumed sessions report `Idle`.
    pub fn poll_tick(&mut self, handle: SessionHandle) -> SessionState {
        let Some(session) = self.current.as_mut().filter(|s| s.handle == handle) else {
            return SessionState::Idle;
        };

        if let Some(frame) = session.tick(self.clock.as_ref(), &self.timings) {
            if let Some(preview) = self.preview.as_mut() {
                preview.show(&frame);
            }
        }
        session.state.clone()
    }

    /// Current state without advancing.
    pub fn state(&self, handle: SessionHandle) -> SessionState {
        self.session(handle)
            .map(|s| s.state.clone())
            .unwrap_or(SessionState::Idle)
    }

    pub fn mode(&self, handle: SessionHandle) -> Option<CaptureMode> {
        self.session(handle).map(|s| s.mode)
    }

    /// Lead-in and deadline, once the device is initialized.
    pub fn session_clock(&self, handle: SessionHandle) -> Option<SessionClock> {
        self.session(handle).and_then(|s| s.clock)
    }

    /// Token cancelled when the session is cancelled or reaches a
    /// terminal state.
    pub fn cancel_token(&self, handle: SessionHandle) -> Option<CancellationToken> {
        self.session(handle).map(|s| s.cancel.clone())
    }

    /// Hand over the artifact of a completed session, consuming it.
    pub fn take_artifact(&mut self, handle: SessionHandle) -> Option<Artifact> {
        let session = self.current.as_mut().filter(|s| s.handle == handle)?;
        if session.state != SessionState::Completed {
            return None;
        }
        let artifact = session.artifact.take();
        self.current = None;
        artifact
    }

    fn session(&self, handle: SessionHandle) -> Option<&Session> {
        self.current.as_ref().filter(|s| s.handle == handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::device::simulated::{SimStats, SimulatedOptions};
    use crate::device::{InitError, Resolution, SimulatedCamera};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn options() -> SimulatedOptions {
        SimulatedOptions {
            resolution: Resolution { width: 2, height: 2 },
            ..SimulatedOptions::default()
        }
    }

    fn manager(
        opts: SimulatedOptions,
        timings: SessionTimings,
    ) -> (SessionManager, Arc<ManualClock>, Arc<SimStats>) {
        let clock = Arc::new(ManualClock::new());
        let stats = Arc::new(SimStats::default());
        let shared = Arc::clone(&stats);
        let factory = move |_mode: CaptureMode| -> Box<dyn Device> {
            Box::new(SimulatedCamera::with_stats(opts.clone(), Arc::clone(&shared)))
        };
        let mgr = SessionManager::new(Box::new(factory), clock.clone(), timings);
        (mgr, clock, stats)
    }

    fn short_timings() -> SessionTimings {
        SessionTimings {
            picture: ModeTiming::from_millis(100, 100),
            boomerang: ModeTiming::from_millis(0, 100),
            video: ModeTiming::from_millis(50, 200),
        }
    }

    const TICK: Duration = Duration::from_millis(20);

    /// Tick until terminal, advancing the clock after each tick.
    fn run(mgr: &mut SessionManager, clock: &ManualClock, handle: SessionHandle) -> SessionState {
        for _ in 0..1000 {
            let state = mgr.poll_tick(handle);
            if state.is_terminal() {
                return state;
            }
            clock.advance(TICK);
        }
        panic!("session never finished");
    }

    #[test]
    fn test_default_timings() {
        let t = SessionTimings::default();
        assert_eq!(t.picture.lead_in, Duration::from_secs(3));
        assert_eq!(t.boomerang.lead_in, Duration::ZERO);
        assert_eq!(t.boomerang.duration, Duration::from_secs(2));
        assert_eq!(t.for_mode(CaptureMode::Video).duration, Duration::from_secs(10));
    }

    #[test]
    fn test_first_tick_initializes() {
        let (mut mgr, _clock, stats) = manager(options(), short_timings());
        let handle = mgr.begin_session(CaptureMode::Picture);
        assert_eq!(mgr.state(handle), SessionState::Initializing);
        assert!(mgr.session_clock(handle).is_none());

        assert_eq!(mgr.poll_tick(handle), SessionState::Previewing);
        assert_eq!(stats.initializes(), 1);
        assert_eq!(stats.captures(), 0);
        assert!(mgr.session_clock(handle).is_some());
    }

    #[test]
    fn test_capture_failure_recovers_once() {
        let opts = SimulatedOptions {
            capture_failures: vec![2],
            ..options()
        };
        let (mut mgr, clock, stats) = manager(opts, short_timings());
        let handle = mgr.begin_session(CaptureMode::Boomerang);

        assert_eq!(run(&mut mgr, &clock, handle), SessionState::Completed);
        // initial + one recovery
        assert_eq!(stats.initializes(), 2);
        // recovery release + final release
        assert_eq!(stats.releases(), 2);
    }

    #[test]
    fn test_second_consecutive_failure_fails_session() {
        let opts = SimulatedOptions {
            capture_failures: vec![2, 3],
            ..options()
        };
        let (mut mgr, clock, stats) = manager(opts, short_timings());
        let handle = mgr.begin_session(CaptureMode::Boomerang);

        let state = run(&mut mgr, &clock, handle);
        assert!(matches!(
            state,
            SessionState::Failed(SessionError::Capture(CaptureError::TransportFailure(_)))
        ));
        assert!(mgr.take_artifact(handle).is_none());
        assert_eq!(stats.releases(), 2);
    }

    #[test]
    fn test_failed_reinitialize_fails_session() {
        let opts = SimulatedOptions {
            capture_failures: vec![2],
            init_failures: vec![2],
            ..options()
        };
        let (mut mgr, clock, stats) = manager(opts, short_timings());
        let handle = mgr.begin_session(CaptureMode::Boomerang);

        assert_eq!(
            run(&mut mgr, &clock, handle),
            SessionState::Failed(SessionError::Init(InitError::Unresponsive { attempts: 1 }))
        );
        assert_eq!(stats.initializes(), 2);
        assert_eq!(stats.captures(), 2);
    }

    #[test]
    fn test_init_failure_fails_session() {
        let opts = SimulatedOptions {
            init_failures: vec![1],
            ..options()
        };
        let (mut mgr, _clock, stats) = manager(opts, short_timings());
        let handle = mgr.begin_session(CaptureMode::Picture);

        assert_eq!(
            mgr.poll_tick(handle),
            SessionState::Failed(SessionError::Init(InitError::Unresponsive { attempts: 1 }))
        );
        assert!(mgr.cancel_token(handle).unwrap().is_cancelled());
        assert_eq!(stats.captures(), 0);
        // Terminal sessions stay put
        assert!(mgr.poll_tick(handle).is_terminal());
    }

    #[test]
    fn test_native_still_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let opts = SimulatedOptions {
            native_still: true,
            output_dir: dir.path().to_path_buf(),
            ..options()
        };
        let (mut mgr, clock, stats) = manager(opts, short_timings());
        let handle = mgr.begin_session(CaptureMode::Picture);

        assert_eq!(run(&mut mgr, &clock, handle), SessionState::Completed);
        assert_eq!(stats.stills(), 1);
        match mgr.take_artifact(handle) {
            Some(Artifact::File(path)) => assert!(path.starts_with(dir.path())),
            other => panic!("expected a still file, got {:?}", other),
        }
    }

    #[test]
    fn test_native_video_recording() {
        let dir = tempfile::tempdir().unwrap();
        let opts = SimulatedOptions {
            native_recording: true,
            output_dir: dir.path().to_path_buf(),
            ..options()
        };
        let (mut mgr, clock, _stats) = manager(opts, short_timings());
        let handle = mgr.begin_session(CaptureMode::Video);

        assert_eq!(run(&mut mgr, &clock, handle), SessionState::Completed);
        match mgr.take_artifact(handle) {
            Some(Artifact::File(path)) => assert!(path.exists()),
            other => panic!("expected a recording, got {:?}", other),
        }
    }

    #[test]
    fn test_capture_failure_while_recording_discards_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let opts = SimulatedOptions {
            native_recording: true,
            capture_failures: vec![6],
            output_dir: dir.path().to_path_buf(),
            ..options()
        };
        let timings = SessionTimings {
            video: ModeTiming::from_millis(0, 200),
            ..short_timings()
        };
        let (mut mgr, clock, stats) = manager(opts, timings);
        let handle = mgr.begin_session(CaptureMode::Video);

        let state = run(&mut mgr, &clock, handle);
        assert!(matches!(
            state,
            SessionState::Failed(SessionError::Capture(CaptureError::TransportFailure(_)))
        ));
        assert!(mgr.take_artifact(handle).is_none());
        // No reinitialize, no second segment, nothing left on disk
        assert_eq!(stats.initializes(), 1);
        assert_eq!(stats.captures(), 6);
        assert_eq!(stats.releases(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_buffered_video_keeps_post_lead_in_frames() {
        let (mut mgr, clock, _stats) = manager(options(), short_timings());
        let handle = mgr.begin_session(CaptureMode::Video);

        assert_eq!(run(&mut mgr, &clock, handle), SessionState::Completed);
        let Some(Artifact::Frames(frames)) = mgr.take_artifact(handle) else {
            panic!("expected frames");
        };
        // Captures at 20,40,..,200ms; lead-in 50ms keeps 60..=200
        assert_eq!(frames.len(), 8);
        let tags: Vec<u8> = frames.iter().map(|f| f.data()[0]).collect();
        assert_eq!(tags, vec![3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_preview_sink_sees_every_frame() {
        let seen = Rc::new(RefCell::new(0u32));
        let counter = Rc::clone(&seen);
        let (mgr, clock, stats) = manager(options(), short_timings());
        let mut mgr = mgr.with_preview(Box::new(move |_f: &Frame| *counter.borrow_mut() += 1));

        let handle = mgr.begin_session(CaptureMode::Boomerang);
        run(&mut mgr, &clock, handle);
        assert_eq!(*seen.borrow(), stats.captures());
    }

    #[test]
    fn test_take_artifact_consumes_session() {
        let (mut mgr, clock, _stats) = manager(options(), short_timings());
        let handle = mgr.begin_session(CaptureMode::Picture);
        run(&mut mgr, &clock, handle);

        assert!(matches!(mgr.take_artifact(handle), Some(Artifact::Picture(_))));
        assert!(mgr.take_artifact(handle).is_none());
        assert_eq!(mgr.poll_tick(handle), SessionState::Idle);
    }

    #[test]
    fn test_take_artifact_before_completion() {
        let (mut mgr, _clock, _stats) = manager(options(), short_timings());
        let handle = mgr.begin_session(CaptureMode::Picture);
        mgr.poll_tick(handle);
        assert!(mgr.take_artifact(handle).is_none());
        assert_eq!(mgr.state(handle), SessionState::Previewing);
    }

    #[test]
    fn test_dropping_manager_releases_device() {
        let (mut mgr, _clock, stats) = manager(options(), short_timings());
        let handle = mgr.begin_session(CaptureMode::Video);
        mgr.poll_tick(handle);
        let token = mgr.cancel_token(handle).unwrap();

        drop(mgr);
        assert_eq!(stats.releases(), 1);
        assert!(token.is_cancelled());
    }
}
