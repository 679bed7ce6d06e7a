//! Hand-off of finished sessions to review and storage.
//!
//! Saving runs on the blocking pool so a slow disk never holds up the next
//! session. Save slots are reserved only after a session completed, so
//! counters never skip for failed or cancelled sessions.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::device::Resolution;
use crate::session::{Artifact, CaptureMode};

/// Errors that can occur while saving an artifact.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode image: {0}")]
    Encode(#[from] image::ImageError),

    /// Pixel buffer does not match the frame's dimensions
    #[error("Frame data does not match its {0} resolution")]
    InvalidFrame(Resolution),
}

/// Where one artifact goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveSlot {
    /// Path without extension; the saver picks it from the artifact
    pub path: PathBuf,
    /// Per-mode counter, starting at 1
    pub counter: u64,
}

/// Hands out unique save locations.
pub trait PathProvider: Send + Sync {
    fn reserve(&self, mode: CaptureMode) -> SaveSlot;
}

/// Writes an artifact into a reserved slot.
pub trait ArtifactSaver: Send + Sync {
    /// Returns the path actually written.
    fn save(&self, artifact: &Artifact, slot: &SaveSlot) -> Result<PathBuf, SaveError>;
}

/// Shows a finished artifact to the operator.
pub trait ReviewSink {
    fn present(&mut self, mode: CaptureMode, artifact: &Artifact);
}

/// Outcome of a background save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifact {
    pub mode: CaptureMode,
    pub path: PathBuf,
    pub counter: u64,
}

/// In-memory per-mode counters under one directory. Counters restart at 1
/// every run.
#[derive(Debug)]
pub struct SequentialPaths {
    dir: PathBuf,
    counters: [AtomicU64; 3],
}

impl SequentialPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counters: Default::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn counter(&self, mode: CaptureMode) -> &AtomicU64 {
        match mode {
            CaptureMode::Picture => &self.counters[0],
            CaptureMode::Boomerang => &self.counters[1],
            CaptureMode::Video => &self.counters[2],
        }
    }
}

impl PathProvider for SequentialPaths {
    fn reserve(&self, mode: CaptureMode) -> SaveSlot {
        let counter = self.counter(mode).fetch_add(1, Ordering::SeqCst) + 1;
        SaveSlot {
            path: self.dir.join(format!("{}_{:04}", mode, counter)),
            counter,
        }
    }
}

/// Saves artifacts as plain files:
/// - pictures as `<slot>.jpg`
/// - frame sequences as `<slot>/frame_NNNN.jpg`
/// - device files copied to `<slot>.<original extension>`
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSaver;

impl FileSaver {
    fn write_jpeg(frame: &crate::device::Frame, path: &Path) -> Result<(), SaveError> {
        let image = frame
            .to_rgb_image()
            .ok_or(SaveError::InvalidFrame(frame.resolution()))?;
        image.save_with_format(path, image::ImageFormat::Jpeg)?;
        Ok(())
    }
}

impl ArtifactSaver for FileSaver {
    fn save(&self, artifact: &Artifact, slot: &SaveSlot) -> Result<PathBuf, SaveError> {
        if let Some(parent) = slot.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match artifact {
            Artifact::Picture(frame) => {
                let path = slot.path.with_extension("jpg");
                Self::write_jpeg(frame, &path)?;
                Ok(path)
            }
            Artifact::Frames(frames) => {
                std::fs::create_dir_all(&slot.path)?;
                for (i, frame) in frames.iter().enumerate() {
                    Self::write_jpeg(frame, &slot.path.join(format!("frame_{:04}.jpg", i)))?;
                }
                Ok(slot.path.clone())
            }
            Artifact::File(source) => {
                let path = match source.extension() {
                    Some(ext) => slot.path.with_extension(ext),
                    None => slot.path.clone(),
                };
                std::fs::copy(source, &path)?;
                Ok(path)
            }
        }
    }
}

/// Collaborators used by the save worker. Each can be swapped in tests.
#[derive(Clone)]
pub struct SaveDependencies {
    pub paths: Arc<dyn PathProvider>,
    pub saver: Arc<dyn ArtifactSaver>,
}

impl SaveDependencies {
    /// Sequential paths and plain files under `dir`.
    pub fn files(dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: Arc::new(SequentialPaths::new(dir)),
            saver: Arc::new(FileSaver),
        }
    }
}

/// Reserve a slot and save `artifact` on the blocking pool.
pub fn spawn_save(
    deps: &SaveDependencies,
    mode: CaptureMode,
    artifact: Artifact,
) -> tokio::task::JoinHandle<Result<SavedArtifact, SaveError>> {
    let deps = deps.clone();
    tokio::task::spawn_blocking(move || {
        let slot = deps.paths.reserve(mode);
        match deps.saver.save(&artifact, &slot) {
            Ok(path) => {
                log::info!("Saved {} #{} to {}", mode, slot.counter, path.display());
                Ok(SavedArtifact {
                    mode,
                    path,
                    counter: slot.counter,
                })
            }
            Err(e) => {
                log::error!("Failed to save {} #{}: {}", mode, slot.counter, e);
                Err(e)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Frame;
    use std::time::Instant;

    fn frame(tag: u8) -> Frame {
        Frame::new(4, 4, vec![tag; 48], Instant::now())
    }

    #[test]
    fn test_counters_are_per_mode() {
        let paths = SequentialPaths::new("/tmp/booth");
        assert_eq!(paths.reserve(CaptureMode::Picture).counter, 1);
        assert_eq!(paths.reserve(CaptureMode::Picture).counter, 2);

        let slot = paths.reserve(CaptureMode::Video);
        assert_eq!(slot.counter, 1);
        assert_eq!(slot.path, PathBuf::from("/tmp/booth/video_0001"));
    }

    #[test]
    fn test_save_picture_as_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let slot = SaveSlot {
            path: dir.path().join("picture_0001"),
            counter: 1,
        };
        let path = FileSaver.save(&Artifact::Picture(frame(200)), &slot).unwrap();

        assert_eq!(path, dir.path().join("picture_0001.jpg"));
        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.width(), 4);
        assert_eq!(decoded.height(), 4);
    }

    #[test]
    fn test_save_frames_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let slot = SaveSlot {
            path: dir.path().join("nested").join("boomerang_0003"),
            counter: 3,
        };
        let frames = vec![frame(1), frame(2), frame(3)];
        let path = FileSaver.save(&Artifact::Frames(frames), &slot).unwrap();

        assert!(path.join("frame_0000.jpg").exists());
        assert!(path.join("frame_0002.jpg").exists());
        assert!(!path.join("frame_0003.jpg").exists());
    }

    #[test]
    fn test_save_file_keeps_extension() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("MVI_0042.MOV");
        std::fs::write(&source, b"movie").unwrap();

        let slot = SaveSlot {
            path: dir.path().join("out").join("video_0001"),
            counter: 1,
        };
        let path = FileSaver.save(&Artifact::File(source.clone()), &slot).unwrap();

        assert_eq!(path.extension().unwrap(), "MOV");
        assert_eq!(std::fs::read(&path).unwrap(), b"movie");
        assert!(source.exists());
    }

    #[test]
    fn test_mismatched_frame_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bad = Frame::new(10, 10, vec![0; 3], Instant::now());
        let slot = SaveSlot {
            path: dir.path().join("picture_0001"),
            counter: 1,
        };
        assert!(matches!(
            FileSaver.save(&Artifact::Picture(bad), &slot),
            Err(SaveError::InvalidFrame(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_save_reserves_after_completion() {
        let dir = tempfile::tempdir().unwrap();
        let deps = SaveDependencies::files(dir.path());

        let first = spawn_save(&deps, CaptureMode::Picture, Artifact::Picture(frame(9)))
            .await
            .unwrap()
            .unwrap();
        let second = spawn_save(&deps, CaptureMode::Picture, Artifact::Picture(frame(9)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.counter, 1);
        assert_eq!(second.counter, 2);
        assert!(second.path.ends_with("picture_0002.jpg"));
    }

    #[tokio::test]
    async fn test_spawn_save_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let deps = SaveDependencies::files(dir.path());
        let missing = Artifact::File(dir.path().join("does-not-exist.mp4"));

        let result = spawn_save(&deps, CaptureMode::Video, missing).await.unwrap();
        assert!(matches!(result, Err(SaveError::Io(_))));
    }
}
