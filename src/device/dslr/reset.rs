//! Recovery actions for a DSLR stuck on a shared USB bus.
//!
//! Desktop helpers (gvfs volume monitors and friends) grab tethered
//! cameras as soon as they appear. Killing them and resetting the USB port
//! are OS-wide side effects, so they live behind [`DeviceReset`].

use std::process::{Command, Stdio};

use super::usb::{find_vendor_device, UsbDevice};

/// Errors from device reset actions.
#[derive(Debug, thiserror::Error)]
pub enum ResetError {
    #[error("No USB device found for vendor '{0}'")]
    DeviceNotFound(String),

    #[error("USB reset is not supported on this platform")]
    Unsupported,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Narrow capability for freeing a locked camera.
pub trait DeviceReset {
    /// Terminate OS processes known to hold the device.
    fn terminate_helpers(&mut self, process_names: &[String]) -> Result<(), ResetError>;

    /// Reset the USB port of the first device matching the vendor name.
    fn reset_usb(&mut self, vendor: &str) -> Result<(), ResetError>;
}

/// Reset capability backed by the real operating system.
#[derive(Debug, Default)]
pub struct SystemReset;

impl DeviceReset for SystemReset {
    fn terminate_helpers(&mut self, process_names: &[String]) -> Result<(), ResetError> {
        for name in process_names {
            // pkill exits 1 when nothing matched, which is fine
            let status = Command::new("pkill")
                .args(["-f", name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()?;
            if status.success() {
                log::info!("Terminated helper process '{}'", name);
            }
        }
        Ok(())
    }

    fn reset_usb(&mut self, vendor: &str) -> Result<(), ResetError> {
        let device = find_vendor_device(vendor)?
            .ok_or_else(|| ResetError::DeviceNotFound(vendor.to_string()))?;
        log::info!("Resetting USB port: {}", device);
        usb_port_reset(&device)
    }
}

#[cfg(target_os = "linux")]
fn usb_port_reset(device: &UsbDevice) -> Result<(), ResetError> {
    use std::os::unix::io::AsRawFd;

    // _IO('U', 20) from linux/usbdevice_fs.h
    const USBDEVFS_RESET: libc::c_ulong = 0x5514;

    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(device.node_path())?;

    let rc = unsafe { libc::ioctl(file.as_raw_fd(), USBDEVFS_RESET as _, 0) };
    if rc < 0 {
        return Err(ResetError::IoError(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn usb_port_reset(_device: &UsbDevice) -> Result<(), ResetError> {
    Err(ResetError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_error_display() {
        let err = ResetError::DeviceNotFound("Canon".to_string());
        assert_eq!(err.to_string(), "No USB device found for vendor 'Canon'");
        assert!(ResetError::Unsupported.to_string().contains("not supported"));
    }

    #[test]
    fn test_terminate_helpers_with_no_names_is_noop() {
        let mut reset = SystemReset;
        assert!(reset.terminate_helpers(&[]).is_ok());
    }
}
