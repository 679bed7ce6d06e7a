//! USB device discovery.
//!
//! Parses `lsusb` output to locate the bus/device node of a camera by
//! vendor name, so its port can be reset.

use std::path::PathBuf;
use std::process::{Command, Stdio};

/// One entry from the system USB device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDevice {
    pub bus: u16,
    pub device: u16,
    /// `vendor:product` hex pair
    pub id: String,
    /// Free-form description, usually starting with the vendor name
    pub description: String,
}

impl UsbDevice {
    /// Device node used for the reset ioctl.
    pub fn node_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/bus/usb/{:03}/{:03}", self.bus, self.device))
    }

    /// Case-insensitive vendor match against the description.
    pub fn matches_vendor(&self, vendor: &str) -> bool {
        self.description
            .to_lowercase()
            .contains(&vendor.to_lowercase())
    }
}

impl std::fmt::Display for UsbDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bus {:03} Device {:03}: ID {} {}",
            self.bus, self.device, self.id, self.description
        )
    }
}

/// Run `lsusb` and parse its output.
///
/// # Errors
/// Returns an error if `lsusb` is missing or fails to run.
pub fn list_usb_devices() -> Result<Vec<UsbDevice>, std::io::Error> {
    let output = Command::new("lsusb")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_usb_list(&stdout))
}

/// Find the first USB device whose description names the vendor.
pub fn find_vendor_device(vendor: &str) -> Result<Option<UsbDevice>, std::io::Error> {
    Ok(list_usb_devices()?
        .into_iter()
        .find(|d| d.matches_vendor(vendor)))
}

/// Parse the full `lsusb` listing, skipping lines that don't parse.
pub fn parse_usb_list(stdout: &str) -> Vec<UsbDevice> {
    stdout.lines().filter_map(parse_usb_line).collect()
}

/// Parse a single `lsusb` line.
///
/// Format: `Bus 001 Device 005: ID 04a9:32d9 Canon, Inc. Canon Digital Camera`
pub fn parse_usb_line(line: &str) -> Option<UsbDevice> {
    let rest = line.trim().strip_prefix("Bus ")?;
    let (bus_str, rest) = rest.split_once(" Device ")?;
    let (device_str, rest) = rest.split_once(": ID ")?;

    let bus = bus_str.trim().parse().ok()?;
    let device = device_str.trim().parse().ok()?;

    // ID is the first token, description is everything after it
    let rest = rest.trim();
    let (id, description) = match rest.split_once(' ') {
        Some((id, desc)) => (id, desc.trim()),
        None => (rest, ""),
    };

    if !id.contains(':') {
        return None;
    }

    Some(UsbDevice {
        bus,
        device,
        id: id.to_string(),
        description: description.to_string(),
    })
}
