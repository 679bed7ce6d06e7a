//! DSLR backend over a vendor capture protocol.
//!
//! Tethered cameras on shared USB buses are flaky: desktop helpers grab
//! them, and PTP sessions wedge. [`DslrCamera::initialize`] therefore
//! retries with recovery between attempts:
//! 1. terminate helper processes known to lock the device
//! 2. on a protocol-level failure, reset the vendor's USB port
//! 3. wait a fixed delay and try again

mod link;
mod reset;
pub mod usb;

#[cfg(feature = "dslr")]
mod gphoto;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use super::error::{CaptureError, InitError, RecordingError};
use super::types::{BackendKind, Frame};
use super::Device;

#[cfg(feature = "dslr")]
pub use gphoto::GphotoLink;
pub use link::{DslrLink, LinkError, RemoteFile};
pub use reset::{DeviceReset, ResetError, SystemReset};

/// Config key selecting where stills are written.
const CAPTURE_TARGET_KEY: &str = "capturetarget";
/// Config key toggling movie recording.
const MOVIE_KEY: &str = "movie";

/// Tunables for the DSLR backend.
#[derive(Debug, Clone)]
pub struct DslrSettings {
    /// USB vendor name used to find the port to reset
    pub vendor: String,
    /// Processes known to claim the camera
    pub helper_processes: Vec<String>,
    pub init_attempts: u32,
    /// Fixed delay between initialization attempts
    pub retry_delay: Duration,
    /// Time the camera needs to finalize a movie file after recording stops
    pub settle_delay: Duration,
    /// Value for the `capturetarget` config key
    pub capture_target: String,
    /// Storage folder searched for finished movies
    pub storage_folder: String,
    pub video_extensions: Vec<String>,
    /// Local directory downloads are written to
    pub download_dir: PathBuf,
}

impl Default for DslrSettings {
    fn default() -> Self {
        Self {
            vendor: "Canon".to_string(),
            helper_processes: vec![
                "gvfs-gphoto2-volume-monitor".to_string(),
                "gvfsd-gphoto2".to_string(),
            ],
            init_attempts: 3,
            retry_delay: Duration::from_secs(1),
            settle_delay: Duration::from_secs(1),
            capture_target: "Memory card".to_string(),
            storage_folder: "/".to_string(),
            video_extensions: vec!["mp4".to_string(), "mov".to_string()],
            download_dir: PathBuf::from("videos"),
        }
    }
}

/// A DSLR driven through a [`DslrLink`], with recovery through a [`DeviceReset`].
pub struct DslrCamera<L, R> {
    link: L,
    reset: R,
    settings: DslrSettings,
    initialized: bool,
    /// Start of the active movie recording
    recording_started: Option<Instant>,
}

impl<L: DslrLink, R: DeviceReset> DslrCamera<L, R> {
    pub fn new(link: L, reset: R, settings: DslrSettings) -> Self {
        Self {
            link,
            reset,
            settings,
            initialized: false,
            recording_started: None,
        }
    }

    pub fn settings(&self) -> &DslrSettings {
        &self.settings
    }

    fn try_connect(&mut self) -> Result<(), LinkError> {
        self.link.connect()?;
        // Not every body exposes a capture target; previews still work without it
        if let Err(e) = self
            .link
            .set_choice(CAPTURE_TARGET_KEY, &self.settings.capture_target)
        {
            log::warn!("Could not set capture target: {}", e);
        }
        Ok(())
    }

    fn recover(&mut self, error: &LinkError) {
        if let Err(e) = self.reset.terminate_helpers(&self.settings.helper_processes) {
            log::warn!("Failed to terminate helper processes: {}", e);
        }
        if error.is_protocol() {
            if let Err(e) = self.reset.reset_usb(&self.settings.vendor) {
                log::warn!("USB reset for '{}' failed: {}", self.settings.vendor, e);
            }
        }
    }

    fn ensure_download_dir(&self) -> std::io::Result<&Path> {
        std::fs::create_dir_all(&self.settings.download_dir)?;
        Ok(&self.settings.download_dir)
    }

    fn finish_recording(&mut self) -> Result<Option<PathBuf>, RecordingError> {
        let write_failure = |e: LinkError| RecordingError::WriteFailure(e.to_string());

        self.link.set_toggle(MOVIE_KEY, false).map_err(write_failure)?;
        thread::sleep(self.settings.settle_delay);

        let files = self
            .link
            .list_files(&self.settings.storage_folder)
            .map_err(write_failure)?;
        let Some(latest) = latest_video(&files, &self.settings.video_extensions) else {
            log::warn!(
                "No movie file found in '{}' after recording",
                self.settings.storage_folder
            );
            return Ok(None);
        };

        let dest = self
            .ensure_download_dir()
            .map_err(|e| RecordingError::WriteFailure(e.to_string()))?
            .join(&latest.name);
        self.link.download(latest, &dest).map_err(write_failure)?;
        Ok(Some(dest))
    }
}

/// Most recently written file with a video extension.
///
/// Falls back to listing order when the camera reports no timestamps.
fn latest_video<'a>(files: &'a [RemoteFile], extensions: &[String]) -> Option<&'a RemoteFile> {
    files
        .iter()
        .filter(|f| f.has_extension(extensions))
        .max_by_key(|f| f.mtime.unwrap_or(i64::MIN))
}

impl<L: DslrLink, R: DeviceReset> Device for DslrCamera<L, R> {
    fn kind(&self) -> BackendKind {
        BackendKind::Dslr
    }

    fn initialize(&mut self) -> Result<(), InitError> {
        if self.initialized {
            return Ok(());
        }

        let attempts = self.settings.init_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.try_connect() {
                Ok(()) => {
                    self.initialized = true;
                    log::info!("DSLR initialized on attempt {}/{}", attempt, attempts);
                    return Ok(());
                }
                Err(e) => {
                    log::warn!(
                        "DSLR initialization attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        e
                    );
                    self.link.disconnect();
                    if attempt < attempts {
                        self.recover(&e);
                        thread::sleep(self.settings.retry_delay);
                    }
                    last_error = Some(e);
                }
            }
        }

        log::error!("DSLR unresponsive after {} attempt(s)", attempts);
        Err(match last_error {
            Some(LinkError::Busy(msg)) => InitError::DriverBusy(msg),
            _ => InitError::Unresponsive { attempts },
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        if !self.initialized {
            return Err(CaptureError::NotInitialized);
        }
        let bytes = self
            .link
            .capture_preview()
            .map_err(|e| CaptureError::TransportFailure(e.to_string()))?;
        Frame::from_jpeg(&bytes)
            .map_err(|e| CaptureError::TransportFailure(format!("undecodable preview: {}", e)))
    }

    fn supports_native_still(&self) -> bool {
        true
    }

    fn capture_still(&mut self) -> Result<PathBuf, CaptureError> {
        if !self.initialized {
            return Err(CaptureError::NotInitialized);
        }
        let transport = |e: LinkError| CaptureError::TransportFailure(e.to_string());

        let remote = self.link.capture_image().map_err(transport)?;
        let dest = self
            .ensure_download_dir()
            .map_err(|e| CaptureError::TransportFailure(e.to_string()))?
            .join(&remote.name);
        self.link.download(&remote, &dest).map_err(transport)?;
        log::info!("Still captured: {:?}", dest);
        Ok(dest)
    }

    fn supports_native_recording(&self) -> bool {
        true
    }

    fn start_recording(&mut self) -> Result<(), RecordingError> {
        if !self.initialized {
            return Err(RecordingError::NotInitialized);
        }
        if self.recording_started.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }
        self.link
            .set_toggle(MOVIE_KEY, true)
            .map_err(|e| RecordingError::WriteFailure(e.to_string()))?;
        self.recording_started = Some(Instant::now());
        log::info!("DSLR movie recording started");
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<Option<PathBuf>, RecordingError> {
        let Some(started) = self.recording_started.take() else {
            return Ok(None);
        };
        let result = self.finish_recording();
        log::info!(
            "DSLR movie recording stopped after {:?}: {:?}",
            started.elapsed(),
            result
        );
        result
    }

    fn is_recording(&self) -> bool {
        self.recording_started.is_some()
    }

    fn recording_duration(&self) -> Duration {
        self.recording_started
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    fn release(&mut self) {
        if self.is_recording() {
            if let Err(e) = self.stop_recording() {
                log::error!("Failed to finalize recording on release: {}", e);
            }
        }
        if self.initialized {
            self.link.disconnect();
            self.initialized = false;
            log::info!("DSLR released");
        }
    }
}
