//! Local webcam backend.
//!
//! The OS driver owns the hardware, so recovery is a plain re-open. Preview
//! and still capture share one read; while recording, every captured frame
//! is also appended to the output stream.

mod recorder;
mod source;

#[cfg(feature = "webcam")]
mod nokhwa_source;

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use super::error::{CaptureError, InitError, RecordingError};
use super::types::{BackendKind, Frame, StreamInfo, WebcamSettings};
use super::Device;

#[cfg(feature = "webcam")]
pub use nokhwa_source::NokhwaSource;
pub use recorder::{
    FfmpegRecorder, FfmpegRecorderFactory, RecorderError, RecorderFactory, RecordingSink,
};
pub use source::{SourceError, VideoSource};

/// Retry policy for opening the webcam, and where recordings go.
#[derive(Debug, Clone)]
pub struct WebcamOptions {
    pub settings: WebcamSettings,
    pub init_attempts: u32,
    pub retry_delay: Duration,
    /// Directory the default FFmpeg recorder writes into
    pub output_dir: PathBuf,
}

impl Default for WebcamOptions {
    fn default() -> Self {
        Self {
            settings: WebcamSettings::default(),
            init_attempts: 3,
            retry_delay: Duration::from_secs(1),
            output_dir: PathBuf::from("videos"),
        }
    }
}

/// Recording in progress, owned by the backend.
struct ActiveRecording {
    sink: Box<dyn RecordingSink>,
    started: Instant,
    /// First write failure, reported when the recording is stopped
    write_error: Option<String>,
}

/// A webcam read through a [`VideoSource`].
pub struct WebcamCamera<S> {
    source: S,
    recorder: Option<Box<dyn RecorderFactory>>,
    options: WebcamOptions,
    /// Negotiated profile while the stream is open
    stream: Option<StreamInfo>,
    recording: Option<ActiveRecording>,
}

impl<S: VideoSource> WebcamCamera<S> {
    /// A webcam recording through FFmpeg into `options.output_dir`.
    pub fn new(source: S, options: WebcamOptions) -> Self {
        let recorder = FfmpegRecorderFactory::new(options.output_dir.clone());
        Self {
            source,
            recorder: Some(Box::new(recorder)),
            options,
            stream: None,
            recording: None,
        }
    }

    /// Record through the given factory instead.
    pub fn with_recorder(mut self, recorder: Box<dyn RecorderFactory>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Drop file recording. Sessions then buffer video frames in memory.
    pub fn without_recorder(mut self) -> Self {
        self.recorder = None;
        self
    }

    /// Profile the driver negotiated, once initialized.
    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.stream
    }
}

impl<S: VideoSource> Device for WebcamCamera<S> {
    fn kind(&self) -> BackendKind {
        BackendKind::Webcam
    }

    fn initialize(&mut self) -> Result<(), InitError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let attempts = self.options.init_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.source.open(&self.options.settings) {
                Ok(info) => {
                    log::info!(
                        "Webcam {} opened at {} {}fps",
                        self.options.settings.device_index,
                        info.resolution,
                        info.fps
                    );
                    self.stream = Some(info);
                    return Ok(());
                }
                Err(e) => {
                    log::warn!(
                        "Webcam initialization attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        e
                    );
                    self.source.close();
                    if attempt < attempts {
                        thread::sleep(self.options.retry_delay);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(SourceError::Busy(msg)) => InitError::DriverBusy(msg),
            _ => InitError::Unresponsive { attempts },
        })
    }

    fn is_initialized(&self) -> bool {
        self.stream.is_some()
    }

    fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.stream.is_none() {
            return Err(CaptureError::NotInitialized);
        }
        let frame = self
            .source
            .read()
            .map_err(|e| CaptureError::TransportFailure(e.to_string()))?;

        if let Some(rec) = self.recording.as_mut() {
            if rec.write_error.is_none() {
                if let Err(e) = rec.sink.write_frame(&frame) {
                    log::warn!("Dropping recording frames after write failure: {}", e);
                    rec.write_error = Some(e.to_string());
                }
            }
        }
        Ok(frame)
    }

    fn supports_native_recording(&self) -> bool {
        self.recorder.is_some()
    }

    fn start_recording(&mut self) -> Result<(), RecordingError> {
        let Some(info) = self.stream else {
            return Err(RecordingError::NotInitialized);
        };
        if self.recording.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }
        let factory = self
            .recorder
            .as_mut()
            .ok_or_else(|| RecordingError::WriteFailure("no recorder configured".to_string()))?;
        let sink = factory
            .create(info)
            .map_err(|e| RecordingError::WriteFailure(e.to_string()))?;

        self.recording = Some(ActiveRecording {
            sink,
            started: Instant::now(),
            write_error: None,
        });
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<Option<PathBuf>, RecordingError> {
        let Some(rec) = self.recording.take() else {
            return Ok(None);
        };
        let frames = rec.sink.frames_written();
        let finished = rec
            .sink
            .finish()
            .map_err(|e| RecordingError::WriteFailure(e.to_string()))?;
        log::info!(
            "Webcam recording stopped after {:?} ({} frames)",
            rec.started.elapsed(),
            frames
        );

        match rec.write_error {
            Some(msg) => Err(RecordingError::WriteFailure(msg)),
            None => Ok(finished),
        }
    }

    fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    fn recording_duration(&self) -> Duration {
        self.recording
            .as_ref()
            .map(|r| r.started.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    fn release(&mut self) {
        if self.is_recording() {
            if let Err(e) = self.stop_recording() {
                log::error!("Failed to finalize recording on release: {}", e);
            }
        }
        if self.stream.take().is_some() {
            self.source.close();
            log::info!("Webcam released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::Resolution;
    use std::cell::RefCell;
    use std::path::Path;
    use std::rc::Rc;

    #[derive(Default)]
    struct SourceState {
        open_failures: Vec<SourceError>,
        opens: u32,
        closes: u32,
        reads: u32,
        fail_reads: bool,
    }

    #[derive(Clone, Default)]
    struct FakeSource(Rc<RefCell<SourceState>>);

    impl VideoSource for FakeSource {
        fn open(&mut self, _settings: &WebcamSettings) -> Result<StreamInfo, SourceError> {
            let mut s = self.0.borrow_mut();
            s.opens += 1;
            if !s.open_failures.is_empty() {
                return Err(s.open_failures.remove(0));
            }
            Ok(StreamInfo {
                resolution: Resolution { width: 4, height: 2 },
                fps: 30,
            })
        }

        fn read(&mut self) -> Result<Frame, SourceError> {
            let mut s = self.0.borrow_mut();
            if s.fail_reads {
                return Err(SourceError::ReadFailed("unplugged".to_string()));
            }
            s.reads += 1;
            Ok(Frame::new(4, 2, vec![s.reads as u8; 24], Instant::now()))
        }

        fn close(&mut self) {
            self.0.borrow_mut().closes += 1;
        }
    }

    struct MemorySink {
        path: PathBuf,
        written: Rc<RefCell<u64>>,
        fail_after: Option<u64>,
    }

    impl RecordingSink for MemorySink {
        fn write_frame(&mut self, _frame: &Frame) -> Result<(), RecorderError> {
            if self.fail_after == Some(*self.written.borrow()) {
                return Err(RecorderError::IoError(std::io::Error::other("disk full")));
            }
            *self.written.borrow_mut() += 1;
            Ok(())
        }

        fn frames_written(&self) -> u64 {
            *self.written.borrow()
        }

        fn path(&self) -> &Path {
            &self.path
        }

        fn finish(self: Box<Self>) -> Result<Option<PathBuf>, RecorderError> {
            if *self.written.borrow() == 0 {
                Ok(None)
            } else {
                Ok(Some(self.path.clone()))
            }
        }
    }

    #[derive(Clone, Default)]
    struct MemoryFactory {
        written: Rc<RefCell<u64>>,
        fail_after: Option<u64>,
    }

    impl RecorderFactory for MemoryFactory {
        fn create(&mut self, info: StreamInfo) -> Result<Box<dyn RecordingSink>, RecorderError> {
            assert_eq!(info.resolution, Resolution { width: 4, height: 2 });
            Ok(Box::new(MemorySink {
                path: PathBuf::from("videos/test.mp4"),
                written: Rc::clone(&self.written),
                fail_after: self.fail_after,
            }))
        }
    }

    fn options() -> WebcamOptions {
        WebcamOptions {
            retry_delay: Duration::ZERO,
            ..WebcamOptions::default()
        }
    }

    #[test]
    fn test_initialize_retries_reopen() {
        let source = FakeSource::default();
        source.0.borrow_mut().open_failures =
            vec![SourceError::OpenFailed("not ready".to_string())];
        let mut cam = WebcamCamera::new(source.clone(), options());

        cam.initialize().unwrap();
        assert!(cam.is_initialized());
        assert_eq!(source.0.borrow().opens, 2);
        assert_eq!(
            cam.stream_info().unwrap().resolution,
            Resolution { width: 4, height: 2 }
        );
    }

    #[test]
    fn test_initialize_exhausted() {
        let source = FakeSource::default();
        source.0.borrow_mut().open_failures =
            vec![SourceError::OpenFailed("gone".to_string()); 3];
        let mut cam = WebcamCamera::new(source.clone(), options());

        assert_eq!(cam.initialize(), Err(InitError::Unresponsive { attempts: 3 }));
        assert!(!cam.is_initialized());
        assert_eq!(source.0.borrow().opens, 3);
    }

    #[test]
    fn test_initialize_busy_driver() {
        let source = FakeSource::default();
        source.0.borrow_mut().open_failures =
            vec![SourceError::Busy("in use by zoom".to_string()); 3];
        let mut cam = WebcamCamera::new(source, options());
        assert!(matches!(cam.initialize(), Err(InitError::DriverBusy(_))));
    }

    #[test]
    fn test_capture_requires_initialize() {
        let mut cam = WebcamCamera::new(FakeSource::default(), options());
        assert_eq!(cam.capture_frame().unwrap_err(), CaptureError::NotInitialized);
        assert_eq!(cam.start_recording(), Err(RecordingError::NotInitialized));
    }

    #[test]
    fn test_capture_read_failure() {
        let source = FakeSource::default();
        let mut cam = WebcamCamera::new(source.clone(), options());
        cam.initialize().unwrap();
        source.0.borrow_mut().fail_reads = true;
        assert!(matches!(
            cam.capture_frame(),
            Err(CaptureError::TransportFailure(_))
        ));
    }

    #[test]
    fn test_recording_appends_captured_frames() {
        let factory = MemoryFactory::default();
        let mut cam = WebcamCamera::new(FakeSource::default(), options())
            .with_recorder(Box::new(factory.clone()));
        assert!(cam.supports_native_recording());

        cam.initialize().unwrap();
        cam.capture_frame().unwrap();
        cam.start_recording().unwrap();
        assert_eq!(cam.start_recording(), Err(RecordingError::AlreadyRecording));
        for _ in 0..3 {
            cam.capture_frame().unwrap();
        }

        // Only frames captured while recording are written
        assert_eq!(*factory.written.borrow(), 3);
        assert_eq!(
            cam.stop_recording(),
            Ok(Some(PathBuf::from("videos/test.mp4")))
        );
        assert!(!cam.is_recording());
    }

    #[test]
    fn test_recording_with_zero_frames_returns_none() {
        let mut cam = WebcamCamera::new(FakeSource::default(), options())
            .with_recorder(Box::new(MemoryFactory::default()));
        cam.initialize().unwrap();
        cam.start_recording().unwrap();
        assert_eq!(cam.stop_recording(), Ok(None));
    }

    #[test]
    fn test_write_failure_surfaces_on_stop() {
        let factory = MemoryFactory {
            fail_after: Some(1),
            ..MemoryFactory::default()
        };
        let mut cam =
            WebcamCamera::new(FakeSource::default(), options()).with_recorder(Box::new(factory));
        cam.initialize().unwrap();
        cam.start_recording().unwrap();
        // Capture keeps working even though the writer broke
        for _ in 0..3 {
            cam.capture_frame().unwrap();
        }
        assert!(matches!(
            cam.stop_recording(),
            Err(RecordingError::WriteFailure(_))
        ));
    }

    #[test]
    fn test_default_camera_records_to_file() {
        let cam = WebcamCamera::new(FakeSource::default(), WebcamOptions::default());
        assert!(cam.supports_native_recording());
    }

    /// Source whose driver negotiates a small profile, so FFmpeg can encode it.
    struct PatternSource;

    impl VideoSource for PatternSource {
        fn open(&mut self, _settings: &WebcamSettings) -> Result<StreamInfo, SourceError> {
            Ok(StreamInfo {
                resolution: Resolution { width: 64, height: 48 },
                fps: 30,
            })
        }

        fn read(&mut self) -> Result<Frame, SourceError> {
            Ok(Frame::new(64, 48, vec![128; 64 * 48 * 3], Instant::now()))
        }

        fn close(&mut self) {}
    }

    fn ffmpeg_with_x264() -> bool {
        std::process::Command::new("ffmpeg")
            .args(["-hide_banner", "-encoders"])
            .output()
            .map(|out| String::from_utf8_lossy(&out.stdout).contains("libx264"))
            .unwrap_or(false)
    }

    #[test]
    fn test_default_options_record_video_file() {
        if !ffmpeg_with_x264() {
            println!("SKIP: FFmpeg with libx264 not available for this test");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let options = WebcamOptions {
            output_dir: dir.path().to_path_buf(),
            ..WebcamOptions::default()
        };
        let mut cam = WebcamCamera::new(PatternSource, options);

        cam.initialize().unwrap();
        cam.start_recording().unwrap();
        for _ in 0..10 {
            cam.capture_frame().unwrap();
        }
        let path = cam.stop_recording().unwrap().unwrap();

        assert!(path.starts_with(dir.path()));
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_start_recording_without_recorder() {
        let mut cam = WebcamCamera::new(FakeSource::default(), options()).without_recorder();
        cam.initialize().unwrap();
        assert!(!cam.supports_native_recording());
        assert!(matches!(
            cam.start_recording(),
            Err(RecordingError::WriteFailure(_))
        ));
    }

    #[test]
    fn test_stop_recording_when_idle() {
        let mut cam = WebcamCamera::new(FakeSource::default(), options());
        assert_eq!(cam.stop_recording(), Ok(None));
        assert_eq!(cam.recording_duration(), Duration::ZERO);
    }

    #[test]
    fn test_release_is_idempotent() {
        let source = FakeSource::default();
        let factory = MemoryFactory::default();
        let mut cam = WebcamCamera::new(source.clone(), options())
            .with_recorder(Box::new(factory.clone()));

        cam.release();
        assert_eq!(source.0.borrow().closes, 0);

        cam.initialize().unwrap();
        cam.start_recording().unwrap();
        cam.capture_frame().unwrap();
        cam.release();
        cam.release();

        assert!(!cam.is_initialized());
        assert!(!cam.is_recording());
        assert_eq!(source.0.borrow().closes, 1);
        assert_eq!(cam.capture_frame().unwrap_err(), CaptureError::NotInitialized);
    }
}
