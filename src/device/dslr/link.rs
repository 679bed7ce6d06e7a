//! Vendor capture protocol seam.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Errors reported by the vendor protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// No camera answered on the bus
    #[error("No camera detected")]
    NotDetected,

    /// Another process has claimed the device
    #[error("Device busy: {0}")]
    Busy(String),

    /// The camera answered but the protocol exchange failed
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl LinkError {
    /// Whether recovery should include a USB port reset.
    pub fn is_protocol(&self) -> bool {
        matches!(self, LinkError::Protocol(_))
    }
}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        LinkError::Io(e.to_string())
    }
}

/// A file living on the camera's storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub folder: String,
    pub name: String,
    /// Modification time in seconds since the epoch, when the camera reports one
    pub mtime: Option<i64>,
}

impl RemoteFile {
    /// Case-insensitive extension check.
    pub fn has_extension(&self, extensions: &[String]) -> bool {
        let name = self.name.to_lowercase();
        extensions
            .iter()
            .any(|ext| name.ends_with(&format!(".{}", ext.to_lowercase())))
    }

    /// Convert a camera timestamp to the `mtime` representation.
    ///
    /// Times before the epoch are treated as unknown.
    pub fn mtime_from(time: SystemTime) -> Option<i64> {
        let secs = time.duration_since(UNIX_EPOCH).ok()?.as_secs();
        i64::try_from(secs).ok()
    }
}

/// Operations the DSLR backend needs from the vendor protocol.
pub trait DslrLink {
    /// Open a session with the first camera found.
    fn connect(&mut self) -> Result<(), LinkError>;

    /// Close the session. Safe to call when not connected.
    fn disconnect(&mut self);

    /// Set a choice-style configuration value (e.g. `capturetarget`).
    fn set_choice(&mut self, key: &str, value: &str) -> Result<(), LinkError>;

    /// Set a toggle-style configuration value (e.g. `movie`).
    fn set_toggle(&mut self, key: &str, on: bool) -> Result<(), LinkError>;

    /// Low-resolution live view image, usually JPEG.
    fn capture_preview(&mut self) -> Result<Vec<u8>, LinkError>;

    /// Full-resolution capture written to the camera's storage.
    fn capture_image(&mut self) -> Result<RemoteFile, LinkError>;

    /// Files in a storage folder, in the order the camera lists them.
    fn list_files(&mut self, folder: &str) -> Result<Vec<RemoteFile>, LinkError>;

    /// Copy a file from the camera to local disk.
    fn download(&mut self, file: &RemoteFile, dest: &Path) -> Result<(), LinkError>;
}
