//! Configuration file handling for darkroom-booth.
//!
//! Loads configuration from `<config dir>/darkroom-booth/config.toml` or a custom path.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device::dslr::DslrSettings;
use crate::device::simulated::SimulatedOptions;
use crate::device::webcam::WebcamOptions;
use crate::device::{BackendKind, Device, DeviceFactory, Resolution, SimulatedCamera, WebcamSettings};
use crate::session::{CaptureMode, ModeTiming, SessionTimings};

/// Configuration file structure for darkroom-booth.
/// Every field has a default, so partial files are valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub dslr: DslrConfig,
    #[serde(default)]
    pub webcam: WebcamConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub backend: BackendKind,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Dslr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DslrConfig {
    /// USB vendor name matched against `lsusb` output
    pub vendor: String,
    pub helper_processes: Vec<String>,
    pub init_attempts: u32,
    pub retry_delay_ms: u64,
    pub settle_delay_ms: u64,
    pub capture_target: String,
    pub storage_folder: String,
    pub video_extensions: Vec<String>,
    pub download_dir: PathBuf,
}

impl Default for DslrConfig {
    fn default() -> Self {
        let d = DslrSettings::default();
        Self {
            vendor: d.vendor,
            helper_processes: d.helper_processes,
            init_attempts: d.init_attempts,
            retry_delay_ms: d.retry_delay.as_millis() as u64,
            settle_delay_ms: d.settle_delay.as_millis() as u64,
            capture_target: d.capture_target,
            storage_folder: d.storage_folder,
            video_extensions: d.video_extensions,
            download_dir: d.download_dir,
        }
    }
}

impl DslrConfig {
    pub fn settings(&self) -> DslrSettings {
        DslrSettings {
            vendor: self.vendor.clone(),
            helper_processes: self.helper_processes.clone(),
            init_attempts: self.init_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            capture_target: self.capture_target.clone(),
            storage_folder: self.storage_folder.clone(),
            video_extensions: self.video_extensions.clone(),
            download_dir: self.download_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebcamConfig {
    pub device: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub init_attempts: u32,
    pub retry_delay_ms: u64,
    /// Encode recordings with ffmpeg; when off, video frames are buffered in memory
    pub record_to_file: bool,
    pub output_dir: PathBuf,
}

impl Default for WebcamConfig {
    fn default() -> Self {
        Self {
            device: 0,
            width: Resolution::FULL_HD.width,
            height: Resolution::FULL_HD.height,
            fps: 30,
            init_attempts: 3,
            retry_delay_ms: 1000,
            record_to_file: true,
            output_dir: PathBuf::from("videos"),
        }
    }
}

impl WebcamConfig {
    pub fn options(&self) -> WebcamOptions {
        WebcamOptions {
            settings: WebcamSettings {
                device_index: self.device,
                resolution: Resolution {
                    width: self.width,
                    height: self.height,
                },
                fps: self.fps,
            },
            init_attempts: self.init_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            output_dir: self.output_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModeConfig {
    pub lead_in_ms: u64,
    pub duration_ms: u64,
}

impl From<ModeConfig> for ModeTiming {
    fn from(m: ModeConfig) -> Self {
        ModeTiming::from_millis(m.lead_in_ms, m.duration_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PartialSessionConfig")]
pub struct SessionConfig {
    /// Poll interval of the capture loop
    pub tick_ms: u64,
    pub picture: ModeConfig,
    pub boomerang: ModeConfig,
    pub video: ModeConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_ms: 20,
            picture: ModeConfig {
                lead_in_ms: 3000,
                duration_ms: 3000,
            },
            boomerang: ModeConfig {
                lead_in_ms: 0,
                duration_ms: 2000,
            },
            video: ModeConfig {
                lead_in_ms: 3000,
                duration_ms: 10_000,
            },
        }
    }
}

/// `[session]` as written on disk. Keys left out of a mode table take that
/// mode's default, not a global one.
#[derive(Deserialize)]
struct PartialSessionConfig {
    tick_ms: Option<u64>,
    picture: Option<PartialModeConfig>,
    boomerang: Option<PartialModeConfig>,
    video: Option<PartialModeConfig>,
}

#[derive(Deserialize)]
struct PartialModeConfig {
    lead_in_ms: Option<u64>,
    duration_ms: Option<u64>,
}

impl PartialModeConfig {
    fn or(self, default: ModeConfig) -> ModeConfig {
        ModeConfig {
            lead_in_ms: self.lead_in_ms.unwrap_or(default.lead_in_ms),
            duration_ms: self.duration_ms.unwrap_or(default.duration_ms),
        }
    }
}

impl From<PartialSessionConfig> for SessionConfig {
    fn from(partial: PartialSessionConfig) -> Self {
        let defaults = SessionConfig::default();
        let fill = |mode: Option<PartialModeConfig>, default: ModeConfig| {
            mode.map_or(default, |m| m.or(default))
        };
        Self {
            tick_ms: partial.tick_ms.unwrap_or(defaults.tick_ms),
            picture: fill(partial.picture, defaults.picture),
            boomerang: fill(partial.boomerang, defaults.boomerang),
            video: fill(partial.video, defaults.video),
        }
    }
}

impl SessionConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn timings(&self) -> SessionTimings {
        SessionTimings {
            picture: self.picture.into(),
            boomerang: self.boomerang.into(),
            video: self.video.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub save_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("saved"),
        }
    }
}

/// Default config file written by `config init`.
pub const DEFAULT_CONFIG: &str = r#"# darkroom-booth configuration

[device]
# Capture backend: dslr, webcam, simulated
backend = "dslr"

[dslr]
# USB vendor name used to find the port to reset
vendor = "Canon"
# Desktop helpers that grab the camera
helper_processes = ["gvfs-gphoto2-volume-monitor", "gvfsd-gphoto2"]
init_attempts = 3
retry_delay_ms = 1000
# Time the camera needs to finish writing a movie
settle_delay_ms = 1000
capture_target = "Memory card"
storage_folder = "/"
video_extensions = ["mp4", "mov"]
download_dir = "videos"

[webcam]
device = 0
width = 1920
height = 1080
fps = 30
init_attempts = 3
retry_delay_ms = 1000
# Encode video with ffmpeg; false keeps frames in memory instead
record_to_file = true
output_dir = "videos"

[session]
tick_ms = 20

[session.picture]
lead_in_ms = 3000
duration_ms = 3000

[session.boomerang]
lead_in_ms = 0
duration_ms = 2000

[session.video]
lead_in_ms = 3000
duration_ms = 10000

[output]
save_dir = "saved"
"#;

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
                path: path.clone(),
                source: e,
            })?;
            let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.clone(),
                source: e,
            })?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Build the device factory for `backend`.
    pub fn device_factory(&self, backend: BackendKind) -> Result<Box<dyn DeviceFactory>, ConfigError> {
        match backend {
            BackendKind::Dslr => self.dslr_factory(),
            BackendKind::Webcam => self.webcam_factory(),
            BackendKind::Simulated => {
                let options = SimulatedOptions {
                    output_dir: self.webcam.output_dir.clone(),
                    ..SimulatedOptions::default()
                };
                Ok(Box::new(move |_mode: CaptureMode| -> Box<dyn Device> {
                    Box::new(SimulatedCamera::new(options.clone()))
                }))
            }
        }
    }

    #[cfg(feature = "dslr")]
    fn dslr_factory(&self) -> Result<Box<dyn DeviceFactory>, ConfigError> {
        use crate::device::dslr::{GphotoLink, SystemReset};
        use crate::device::DslrCamera;

        let settings = self.dslr.settings();
        Ok(Box::new(move |_mode: CaptureMode| -> Box<dyn Device> {
            Box::new(DslrCamera::new(GphotoLink::new(), SystemReset, settings.clone()))
        }))
    }

    #[cfg(not(feature = "dslr"))]
    fn dslr_factory(&self) -> Result<Box<dyn DeviceFactory>, ConfigError> {
        Err(ConfigError::BackendUnavailable {
            backend: BackendKind::Dslr,
            feature: "dslr",
        })
    }

    #[cfg(feature = "webcam")]
    fn webcam_factory(&self) -> Result<Box<dyn DeviceFactory>, ConfigError> {
        use crate::device::webcam::NokhwaSource;
        use crate::device::WebcamCamera;

        let options = self.webcam.options();
        let record_to_file = self.webcam.record_to_file;
        Ok(Box::new(move |_mode: CaptureMode| -> Box<dyn Device> {
            let camera = WebcamCamera::new(NokhwaSource::new(), options.clone());
            if record_to_file {
                Box::new(camera)
            } else {
                Box::new(camera.without_recorder())
            }
        }))
    }

    #[cfg(not(feature = "webcam"))]
    fn webcam_factory(&self) -> Result<Box<dyn DeviceFactory>, ConfigError> {
        Err(ConfigError::BackendUnavailable {
            backend: BackendKind::Webcam,
            feature: "webcam",
        })
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// The backend was compiled out
    BackendUnavailable {
        backend: BackendKind,
        feature: &'static str,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError { path, source } => {
                write!(
                    f,
                    "Failed to read config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::ParseError { path, source } => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::BackendUnavailable { backend, feature } => {
                write!(
                    f,
                    "The {} backend is not available in this build (enable the '{}' feature)",
                    backend, feature
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
            ConfigError::BackendUnavailable { .. } => None,
        }
    }
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("darkroom-booth").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/darkroom-booth/config.toml")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_matches_defaults() {
        let parsed: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Config = toml::from_str(
            r#"
[device]
backend = "webcam"

[webcam]
fps = 15

[session.picture]
lead_in_ms = 1000

[session.video]
duration_ms = 5000
"#,
        )
        .unwrap();

        assert_eq!(parsed.device.backend, BackendKind::Webcam);
        assert_eq!(parsed.webcam.fps, 15);
        assert_eq!(parsed.webcam.width, 1920);
        assert_eq!(parsed.session.tick_ms, 20);
        // Half-filled mode tables keep that mode's own defaults
        assert_eq!(
            parsed.session.timings().video,
            ModeTiming::from_millis(3000, 5000)
        );
        assert_eq!(
            parsed.session.timings().picture,
            ModeTiming::from_millis(1000, 3000)
        );
        assert_eq!(
            parsed.session.timings().boomerang,
            ModeTiming::from_millis(0, 2000)
        );
        assert_eq!(parsed.dslr.vendor, "Canon");
    }

    #[test]
    fn test_mode_table_with_only_duration() {
        let parsed: Config = toml::from_str("[session.video]\nduration_ms = 5000\n").unwrap();
        assert_eq!(parsed.session.video.lead_in_ms, 3000);
        assert_eq!(parsed.session.video.duration_ms, 5000);
        assert_eq!(parsed.session.picture, SessionConfig::default().picture);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_bad_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[device]\nbackend = \"polaroid\"\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_dslr_settings_conversion() {
        let mut config = DslrConfig::default();
        config.retry_delay_ms = 250;
        let settings = config.settings();
        assert_eq!(settings.retry_delay, Duration::from_millis(250));
        assert_eq!(settings.init_attempts, 3);
        assert_eq!(settings.video_extensions, vec!["mp4", "mov"]);
    }

    #[test]
    fn test_webcam_options_conversion() {
        let config = WebcamConfig::default();
        assert!(config.record_to_file);
        let options = config.options();
        assert_eq!(options.output_dir, PathBuf::from("videos"));
        assert_eq!(options.settings.resolution, Resolution::FULL_HD);
        assert_eq!(options.settings.fps, 30);
        assert_eq!(options.retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_tick_never_zero() {
        let session = SessionConfig {
            tick_ms: 0,
            ..SessionConfig::default()
        };
        assert_eq!(session.tick(), Duration::from_millis(1));
    }

    #[test]
    fn test_simulated_factory_always_available() {
        let mut factory = Config::default()
            .device_factory(BackendKind::Simulated)
            .unwrap();
        let device = factory.acquire(CaptureMode::Picture);
        assert_eq!(device.kind(), BackendKind::Simulated);
    }

    #[cfg(not(feature = "dslr"))]
    #[test]
    fn test_dslr_unavailable_without_feature() {
        let err = match Config::default().device_factory(BackendKind::Dslr) {
            Err(e) => e,
            Ok(_) => panic!("dslr backend should be compiled out"),
        };
        assert!(err.to_string().contains("'dslr' feature"));
    }
}
