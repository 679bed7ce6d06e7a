//! Device types and data structures.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Which hardware family a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Tethered DSLR driven over the vendor capture protocol
    Dslr,
    /// Driver-managed local webcam
    Webcam,
    /// Test-pattern device with no hardware behind it
    Simulated,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Dslr => write!(f, "dslr"),
            BackendKind::Webcam => write!(f, "webcam"),
            BackendKind::Simulated => write!(f, "simulated"),
        }
    }
}

/// Capture resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// 640x480, the usual fallback when a driver ignores the request
    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };

    /// 1920x1080, the booth's requested webcam profile
    pub const FULL_HD: Resolution = Resolution {
        width: 1920,
        height: 1080,
    };
}

impl Default for Resolution {
    fn default() -> Self {
        Self::FULL_HD
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel format of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// RGB format (3 bytes per pixel)
    Rgb,
}

/// An immutable snapshot of decoded image data.
///
/// Pixel storage is reference counted, so cloning a frame into several
/// buffers (preview sink, boomerang arrangement) never copies pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Arc<[u8]>,
    width: u32,
    height: u32,
    format: FrameFormat,
    timestamp: Instant,
}

impl Frame {
    /// Build an RGB frame from a raw pixel buffer.
    pub fn new(width: u32, height: u32, data: Vec<u8>, timestamp: Instant) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            format: FrameFormat::Rgb,
            timestamp,
        }
    }

    /// Raw pixel data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// When the backend produced this frame.
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }

    /// Get the number of bytes per pixel (3 for RGB).
    pub fn bytes_per_pixel(&self) -> usize {
        match self.format {
            FrameFormat::Rgb => 3,
        }
    }

    /// True when both frames share the same pixel allocation.
    pub fn same_pixels(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

/// Settings requested from a driver-managed webcam.
#[derive(Debug, Clone)]
pub struct WebcamSettings {
    /// Camera device index
    pub device_index: u32,
    /// Requested resolution (actual may differ)
    pub resolution: Resolution,
    /// Requested FPS (actual may differ)
    pub fps: u32,
}

impl Default for WebcamSettings {
    fn default() -> Self {
        Self {
            device_index: 0,
            resolution: Resolution::default(),
            fps: 30,
        }
    }
}

/// Profile a driver actually negotiated when a stream was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub resolution: Resolution,
    pub fps: u32,
}
