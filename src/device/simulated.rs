//! Hardware-free test-pattern device.
//!
//! Lets the booth run without a camera attached, and gives tests a device
//! whose failures can be scripted. Call counters live in a shared
//! [`SimStats`] so they stay observable after the device is boxed and handed
//! to a session.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::{CaptureError, InitError, RecordingError};
use super::types::{BackendKind, Frame, Resolution};
use super::Device;

/// Counters shared between a simulated device and its observers.
#[derive(Debug, Default)]
pub struct SimStats {
    initializes: AtomicU32,
    releases: AtomicU32,
    captures: AtomicU32,
    stills: AtomicU32,
}

impl SimStats {
    /// Calls to `initialize` that reached the hardware.
    pub fn initializes(&self) -> u32 {
        self.initializes.load(Ordering::SeqCst)
    }

    /// Calls to `release` that freed an initialized device.
    pub fn releases(&self) -> u32 {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn captures(&self) -> u32 {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn stills(&self) -> u32 {
        self.stills.load(Ordering::SeqCst)
    }
}

/// Behaviour script for a [`SimulatedCamera`].
#[derive(Debug, Clone)]
pub struct SimulatedOptions {
    pub resolution: Resolution,
    /// 1-based `initialize` call numbers that fail
    pub init_failures: Vec<u32>,
    /// 1-based `capture_frame` call numbers that fail
    pub capture_failures: Vec<u32>,
    pub native_still: bool,
    pub native_recording: bool,
    /// Where stills and recordings are written
    pub output_dir: PathBuf,
}

impl Default for SimulatedOptions {
    fn default() -> Self {
        Self {
            resolution: Resolution::VGA,
            init_failures: Vec::new(),
            capture_failures: Vec::new(),
            native_still: false,
            native_recording: false,
            output_dir: PathBuf::from("videos"),
        }
    }
}

struct SimRecording {
    file: File,
    path: PathBuf,
    started: Instant,
    frames: u32,
}

/// Deterministic device producing solid frames whose pixel value is the
/// capture call number.
pub struct SimulatedCamera {
    options: SimulatedOptions,
    stats: Arc<SimStats>,
    initialized: bool,
    recording: Option<SimRecording>,
}

impl SimulatedCamera {
    pub fn new(options: SimulatedOptions) -> Self {
        Self::with_stats(options, Arc::new(SimStats::default()))
    }

    /// Share counters with other instances (e.g. one per session).
    pub fn with_stats(options: SimulatedOptions, stats: Arc<SimStats>) -> Self {
        Self {
            options,
            stats,
            initialized: false,
            recording: None,
        }
    }

    pub fn stats(&self) -> Arc<SimStats> {
        Arc::clone(&self.stats)
    }

    fn pattern(&self, n: u32) -> Frame {
        let Resolution { width, height } = self.options.resolution;
        let len = width as usize * height as usize * 3;
        Frame::new(width, height, vec![(n % 256) as u8; len], Instant::now())
    }
}

impl Device for SimulatedCamera {
    fn kind(&self) -> BackendKind {
        BackendKind::Simulated
    }

    fn initialize(&mut self) -> Result<(), InitError> {
        if self.initialized {
            return Ok(());
        }
        let call = self.stats.initializes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.options.init_failures.contains(&call) {
            log::warn!("Simulated initialization failure on call {}", call);
            return Err(InitError::Unresponsive { attempts: 1 });
        }
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        if !self.initialized {
            return Err(CaptureError::NotInitialized);
        }
        let n = self.stats.captures.fetch_add(1, Ordering::SeqCst) + 1;
        if self.options.capture_failures.contains(&n) {
            return Err(CaptureError::TransportFailure(format!(
                "simulated failure on capture {}",
                n
            )));
        }

        let frame = self.pattern(n);
        if let Some(rec) = self.recording.as_mut() {
            rec.file
                .write_all(frame.data())
                .map_err(|e| CaptureError::TransportFailure(e.to_string()))?;
            rec.frames += 1;
        }
        Ok(frame)
    }

    fn supports_native_still(&self) -> bool {
        self.options.native_still
    }

    fn capture_still(&mut self) -> Result<PathBuf, CaptureError> {
        if !self.options.native_still {
            return Err(CaptureError::Unsupported);
        }
        if !self.initialized {
            return Err(CaptureError::NotInitialized);
        }
        let n = self.stats.stills.fetch_add(1, Ordering::SeqCst) + 1;
        let transport = |e: std::io::Error| CaptureError::TransportFailure(e.to_string());

        std::fs::create_dir_all(&self.options.output_dir).map_err(transport)?;
        let path = self.options.output_dir.join(format!("sim_still_{}.jpg", n));
        let image = self
            .pattern(n)
            .to_rgb_image()
            .ok_or_else(|| CaptureError::TransportFailure("bad pattern size".to_string()))?;
        image
            .save(&path)
            .map_err(|e| CaptureError::TransportFailure(e.to_string()))?;
        Ok(path)
    }

    fn supports_native_recording(&self) -> bool {
        self.options.native_recording
    }

    fn start_recording(&mut self) -> Result<(), RecordingError> {
        if !self.initialized {
            return Err(RecordingError::NotInitialized);
        }
        if self.recording.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }
        let write_failure = |e: std::io::Error| RecordingError::WriteFailure(e.to_string());

        std::fs::create_dir_all(&self.options.output_dir).map_err(write_failure)?;
        let started = Instant::now();
        let path = self.options.output_dir.join(format!(
            "sim_recording_{}.rgb",
            self.stats.captures()
        ));
        let file = File::create(&path).map_err(write_failure)?;
        self.recording = Some(SimRecording {
            file,
            path,
            started,
            frames: 0,
        });
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<Option<PathBuf>, RecordingError> {
        let Some(mut rec) = self.recording.take() else {
            return Ok(None);
        };
        rec.file
            .flush()
            .map_err(|e| RecordingError::WriteFailure(e.to_string()))?;
        drop(rec.file);

        if rec.frames == 0 {
            if let Err(e) = std::fs::remove_file(&rec.path) {
                log::warn!(
                    "Failed to remove empty recording {}: {}",
                    rec.path.display(),
                    e
                );
            }
            return Ok(None);
        }
        Ok(Some(rec.path))
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
        if self.initialized {
            self.initialized = false;
            self.stats.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}
