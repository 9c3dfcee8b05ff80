use serde::Deserialize;
use skinscan_core::ScanConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon configuration: optional TOML file, then `SKINSCAN_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Set to false to always run the timed fallback scan.
    pub camera_enabled: bool,
    /// Directory containing the face-mesh ONNX model.
    pub model_dir: PathBuf,
    /// Set to false to run the camera loop without face detection.
    pub detector_enabled: bool,
    /// Transient per-login-session storage for results and captures.
    pub session_dir: PathBuf,
    /// Pacing of the fallback and idle loops, in milliseconds.
    pub frame_interval_ms: u64,
    /// Length of the scanning phase, in milliseconds.
    pub scan_duration_ms: u64,
    /// Whether to keep a mirrored JPEG of the frame shown with the result.
    pub persist_capture: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            camera_enabled: true,
            model_dir: skinscan_core::default_model_dir(),
            detector_enabled: true,
            session_dir: default_session_dir(),
            frame_interval_ms: 33,
            scan_duration_ms: 3000,
            persist_capture: true,
        }
    }
}

impl Config {
    /// Load `$SKINSCAN_CONFIG` (or the XDG default path, when present), then
    /// apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("SKINSCAN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path());

        let mut config = if path.exists() {
            let config = Self::from_file(&path)?;
            tracing::info!(path = %path.display(), "loaded config file");
            config
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `SKINSCAN_*` overrides looked up through `get`.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("SKINSCAN_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = get("SKINSCAN_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = get("SKINSCAN_SESSION_DIR") {
            self.session_dir = PathBuf::from(v);
        }
        self.camera_enabled = parse_flag(get("SKINSCAN_CAMERA_ENABLED"), self.camera_enabled);
        self.detector_enabled = parse_flag(get("SKINSCAN_DETECTOR_ENABLED"), self.detector_enabled);
        self.persist_capture = parse_flag(get("SKINSCAN_PERSIST_CAPTURE"), self.persist_capture);
        self.frame_interval_ms = parse_or(get("SKINSCAN_FRAME_INTERVAL_MS"), self.frame_interval_ms);
        self.scan_duration_ms = parse_or(get("SKINSCAN_SCAN_DURATION_MS"), self.scan_duration_ms);
    }

    /// Path to the face-mesh model.
    pub fn landmark_model_path(&self) -> String {
        self.model_dir
            .join("face_landmark.onnx")
            .to_string_lossy()
            .into_owned()
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    /// Scan tunables with this daemon's overrides applied.
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            scan_duration: Duration::from_millis(self.scan_duration_ms),
            ..ScanConfig::default()
        }
    }
}

fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("skinscan/skinscand.toml")
}

fn default_session_dir() -> PathBuf {
    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(dir) => PathBuf::from(dir).join("skinscan"),
        Err(_) => {
            let user = std::env::var("USER").unwrap_or_else(|_| "nobody".to_string());
            PathBuf::from(format!("/tmp/skinscan-{user}"))
        }
    }
}

fn parse_flag(value: Option<String>, default: bool) -> bool {
    value.map(|v| v != "0" && v != "false").unwrap_or(default)
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}
