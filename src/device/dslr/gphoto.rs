//! libgphoto2-backed vendor link.

use std::path::Path;

use gphoto2::error::ErrorKind;
use gphoto2::widget::{RadioWidget, ToggleWidget};
use gphoto2::{Camera, Context};

use super::link::{DslrLink, LinkError, RemoteFile};

/// [`DslrLink`] over libgphoto2 (PTP over USB).
#[derive(Default)]
pub struct GphotoLink {
    context: Option<Context>,
    camera: Option<Camera>,
}

impl GphotoLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self) -> Result<(&Context, &Camera), LinkError> {
        match (&self.context, &self.camera) {
            (Some(ctx), Some(cam)) => Ok((ctx, cam)),
            _ => Err(LinkError::NotDetected),
        }
    }
}

fn map_err(e: gphoto2::Error) -> LinkError {
    match e.kind() {
        ErrorKind::ModelNotFound => LinkError::NotDetected,
        ErrorKind::IoUsbClaim | ErrorKind::IoLock | ErrorKind::CameraBusy => {
            LinkError::Busy(e.to_string())
        }
        _ => LinkError::Protocol(e.to_string()),
    }
}

/// Modification time from the camera's file info, if it reports one.
fn file_mtime(camera: &Camera, folder: &str, name: &str) -> Option<i64> {
    match camera.fs().file_info(folder, name).wait() {
        Ok(info) => info
            .file()
            .and_then(|file| file.mtime())
            .and_then(RemoteFile::mtime_from),
        Err(e) => {
            log::debug!("No file info for {}/{}: {}", folder, name, e);
            None
        }
    }
}

impl DslrLink for GphotoLink {
    fn connect(&mut self) -> Result<(), LinkError> {
        let context = Context::new().map_err(map_err)?;
        let camera = context.autodetect_camera().wait().map_err(map_err)?;
        self.camera = Some(camera);
        self.context = Some(context);
        Ok(())
    }

    fn disconnect(&mut self) {
        // Dropping the camera closes the PTP session
        self.camera = None;
        self.context = None;
    }

    fn set_choice(&mut self, key: &str, value: &str) -> Result<(), LinkError> {
        let (_, camera) = self.session()?;
        let widget = camera.config_key::<RadioWidget>(key).wait().map_err(map_err)?;
        widget.set_choice(value).map_err(map_err)?;
        camera.set_config(&widget).wait().map_err(map_err)
    }

    fn set_toggle(&mut self, key: &str, on: bool) -> Result<(), LinkError> {
        let (_, camera) = self.session()?;
        let widget = camera.config_key::<ToggleWidget>(key).wait().map_err(map_err)?;
        widget.set_toggled(on);
        camera.set_config(&widget).wait().map_err(map_err)
    }

    fn capture_preview(&mut self) -> Result<Vec<u8>, LinkError> {
        let (context, camera) = self.session()?;
        let file = camera.capture_preview().wait().map_err(map_err)?;
        let data = file.get_data(context).wait().map_err(map_err)?;
        Ok(data.into_vec())
    }

    fn capture_image(&mut self) -> Result<RemoteFile, LinkError> {
        let (_, camera) = self.session()?;
        let path = camera.capture_image().wait().map_err(map_err)?;
        Ok(RemoteFile {
            folder: path.folder().to_string(),
            name: path.name().to_string(),
            mtime: None,
        })
    }

    fn list_files(&mut self, folder: &str) -> Result<Vec<RemoteFile>, LinkError> {
        let (_, camera) = self.session()?;
        let names = camera.fs().list_files(folder).wait().map_err(map_err)?;
        Ok(names
            .map(|name| {
                let mtime = file_mtime(camera, folder, &name);
                RemoteFile {
                    folder: folder.to_string(),
                    name,
                    mtime,
                }
            })
            .collect())
    }

    fn download(&mut self, file: &RemoteFile, dest: &Path) -> Result<(), LinkError> {
        let (_, camera) = self.session()?;
        camera
            .fs()
            .download_to(&file.folder, &file.name, dest)
            .wait()
            .map(|_| ())
            .map_err(map_err)
    }
}
