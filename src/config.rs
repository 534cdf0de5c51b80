//! Configuration file handling for tryon-view.
//!
//! Loads configuration from `<config dir>/tryon-view/config.toml` or a custom path.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::{SessionPreset, SessionSettings};
use crate::permissions::PermissionState;
use crate::preview::Size;

/// Configuration file structure for tryon-view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub simulated: SimulatedConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CameraConfig {
    #[serde(default)]
    pub preset: SessionPreset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
        }
    }
}

/// Behaviour of the simulated camera stack (used when built without `native`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedConfig {
    #[serde(default = "default_true")]
    pub front_camera: bool,
    #[serde(default)]
    pub permission: PermissionState,
    #[serde(default = "default_true")]
    pub grant_on_prompt: bool,
    #[serde(default = "default_start_latency_ms")]
    pub start_latency_ms: u64,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            front_camera: true,
            permission: PermissionState::default(),
            grant_on_prompt: true,
            start_latency_ms: default_start_latency_ms(),
        }
    }
}

impl SimulatedConfig {
    pub fn start_latency(&self) -> Duration {
        Duration::from_millis(self.start_latency_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_width() -> u32 {
    1080
}

fn default_height() -> u32 {
    1920
}

fn default_start_latency_ms() -> u64 {
    30
}

/// Contents written by `config init`.
pub const DEFAULT_CONFIG: &str = r#"# tryon-view configuration

[camera]
# Capture quality: low, medium, high
preset = "high"

[preview]
# Initial container size in pixels
width = 1080
height = 1920

[simulated]
# Only used when built without the `native` feature
front_camera = true
# Initial authorization: granted, denied, undetermined
permission = "undetermined"
# Answer given when the permission prompt is shown
grant_on_prompt = true
# Time the simulated hardware takes to start streaming
start_latency_ms = 30
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

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            preset: self.camera.preset,
        }
    }

    /// Initial preview bounds. Zero dimensions fall back to the defaults.
    pub fn preview_bounds(&self) -> Size {
        let width = if self.preview.width == 0 {
            default_width()
        } else {
            self.preview.width
        };
        let height = if self.preview.height == 0 {
            default_height()
        } else {
            self.preview.height
        };
        Size::new(width, height)
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
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
        }
    }
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("tryon-view").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/tryon-view/config.toml")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.camera.preset, SessionPreset::High);
        assert_eq!(config.preview_bounds(), Size::new(1080, 1920));
        assert_eq!(config.simulated.permission, PermissionState::Undetermined);
        assert!(config.simulated.grant_on_prompt);
        assert_eq!(config.simulated.start_latency(), Duration::from_millis(30));
    }

    #[test]
    fn test_default_config_text_matches_defaults() {
        let parsed: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: Config = toml::from_str(
            r#"
            [camera]
            preset = "low"

            [simulated]
            permission = "denied"
            "#,
        )
        .unwrap();
        assert_eq!(config.camera.preset, SessionPreset::Low);
        assert_eq!(config.simulated.permission, PermissionState::Denied);
        assert!(config.simulated.front_camera);
    }

    #[test]
    fn test_mirror_key_is_ignored() {
        // Older files carried a mirror switch; the preview is always mirrored now.
        let config: Config = toml::from_str("[camera]\nmirror = false\n").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.session_settings(), SessionSettings::default());
    }

    #[test]
    fn test_zero_bounds_fall_back() {
        let config: Config = toml::from_str("[preview]\nwidth = 0\nheight = 0\n").unwrap();
        assert_eq!(config.preview_bounds(), Size::new(1080, 1920));
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = Config::load(Some(Path::new("/nonexistent/tryon-view/config.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_default_path_ends_with_config_toml() {
        let path = default_path();
        assert!(path.ends_with("tryon-view/config.toml"));
    }
}
