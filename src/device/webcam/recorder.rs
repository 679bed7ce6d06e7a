//! Local video recording for webcams.
//!
//! Webcams have no on-device recording, so frames are piped as raw RGB into
//! an FFmpeg process that encodes the output file.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::device::types::{Frame, Resolution, StreamInfo};

/// Errors that can occur while recording.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("FFmpeg not found. Install it and make sure it is on PATH")]
    FfmpegNotFound,

    #[error("Failed to spawn FFmpeg: {0}")]
    SpawnFailed(std::io::Error),

    #[error("Frame is {got}, recording expects {expected}")]
    FrameMismatch {
        expected: Resolution,
        got: Resolution,
    },

    #[error("FFmpeg exited with code {exit_code:?}\n{stderr}")]
    ProcessFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// An open output stream that frames are appended to.
pub trait RecordingSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), RecorderError>;

    fn frames_written(&self) -> u64;

    /// Where the recording is being written.
    fn path(&self) -> &Path;

    /// Close the stream. Returns `None` if no frame was ever written.
    fn finish(self: Box<Self>) -> Result<Option<PathBuf>, RecorderError>;
}

/// Opens a new sink at a stream's negotiated profile.
pub trait RecorderFactory {
    fn create(&mut self, info: StreamInfo) -> Result<Box<dyn RecordingSink>, RecorderError>;
}

/// Spawns one FFmpeg encoder per recording.
#[derive(Debug, Clone)]
pub struct FfmpegRecorderFactory {
    output_dir: PathBuf,
    binary: String,
}

impl FfmpegRecorderFactory {
    pub fn new(output_dir: PathBuf) -> Self {
        Self::with_binary(output_dir, "ffmpeg")
    }

    /// Use a specific FFmpeg executable.
    pub fn with_binary(output_dir: PathBuf, binary: impl Into<String>) -> Self {
        Self {
            output_dir,
            binary: binary.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl RecorderFactory for FfmpegRecorderFactory {
    fn create(&mut self, info: StreamInfo) -> Result<Box<dyn RecordingSink>, RecorderError> {
        std::fs::create_dir_all(&self.output_dir)?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let path = self.output_dir.join(format!("webcam_{}.mp4", stamp));
        let recorder = FfmpegRecorder::spawn(&self.binary, path, info)?;
        Ok(Box::new(recorder))
    }
}

/// A running FFmpeg encoder fed through stdin.
pub struct FfmpegRecorder {
    child: Child,
    stdin: Option<ChildStdin>,
    path: PathBuf,
    resolution: Resolution,
    frames: u64,
    stderr_thread: Option<JoinHandle<Vec<String>>>,
}

impl FfmpegRecorder {
    fn spawn(binary: &str, path: PathBuf, info: StreamInfo) -> Result<Self, RecorderError> {
        let size = info.resolution.to_string();
        let fps = info.fps.max(1).to_string();

        let mut child = Command::new(binary)
            .args([
                "-y",
                "-loglevel",
                "error",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-s",
                &size,
                "-r",
                &fps,
                "-i",
                "-",
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
            ])
            .arg(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RecorderError::FfmpegNotFound
                } else {
                    RecorderError::SpawnFailed(e)
                }
            })?;

        let stdin = child.stdin.take();
        let stderr_thread = child.stderr.take().map(|stderr| {
            thread::spawn(move || {
                BufReader::new(stderr)
                    .lines()
                    .map_while(Result::ok)
                    .inspect(|l| log::debug!("[ffmpeg] {}", l))
                    .collect::<Vec<String>>()
            })
        });

        log::info!("Recording to {:?} at {} {}fps", path, size, fps);
        Ok(Self {
            child,
            stdin,
            path,
            resolution: info.resolution,
            frames: 0,
            stderr_thread,
        })
    }
}

impl RecordingSink for FfmpegRecorder {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), RecorderError> {
        if frame.resolution() != self.resolution {
            return Err(RecorderError::FrameMismatch {
                expected: self.resolution,
                got: frame.resolution(),
            });
        }
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            RecorderError::IoError(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        })?;
        stdin.write_all(frame.data())?;
        self.frames += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn finish(mut self: Box<Self>) -> Result<Option<PathBuf>, RecorderError> {
        // Closing stdin signals end of input
        drop(self.stdin.take());
        let status = self.child.wait()?;
        let stderr = self
            .stderr_thread
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if self.frames == 0 {
            let _ = std::fs::remove_file(&self.path);
            return Ok(None);
        }
        if !status.success() {
            return Err(RecorderError::ProcessFailed {
                exit_code: status.code(),
                stderr: stderr.join("\n"),
            });
        }
        Ok(Some(self.path.clone()))
    }
}

impl Drop for FfmpegRecorder {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
