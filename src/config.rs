// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::{ControllerSettings, Resolution};
use crate::constants::{self, app_info, capture};
use crate::errors::ConfigError;
use crate::pipelines::photo::EncodingQuality;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Persistent user settings
///
/// Stored as JSON in `<config_dir>/burst-camera/config.json`. Missing fields
/// take their defaults, so older files keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Album directory name under the user's Pictures directory
    pub album_name: String,
    /// Store photos here instead of the album
    pub photo_dir: Option<PathBuf>,
    /// Open the front camera first
    pub prefer_front_camera: bool,
    /// Frames per burst
    pub burst_count: usize,
    /// Still-capture buffers
    pub image_reader_capacity: usize,
    /// How long a burst waits for its frames
    pub burst_timeout_ms: u64,
    /// Largest preview stream to request
    pub max_preview: Resolution,
    /// Re-encode quality of saved photos
    pub jpeg_quality: EncodingQuality,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            album_name: constants::DEFAULT_ALBUM.to_string(),
            photo_dir: None,
            prefer_front_camera: false,
            burst_count: constants::BURST_FRAME_COUNT,
            image_reader_capacity: constants::IMAGE_READER_CAPACITY,
            burst_timeout_ms: capture::BURST_TIMEOUT.as_millis() as u64,
            max_preview: Resolution::new(capture::MAX_PREVIEW_WIDTH, capture::MAX_PREVIEW_HEIGHT),
            jpeg_quality: EncodingQuality::Maximum,
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(app_info::APP_NAME).join("config.json"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from the default location, falling back to defaults
    ///
    /// A missing or unreadable file is logged and replaced by defaults.
    pub fn load() -> Self {
        let path = match Self::config_path() {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Using default configuration");
                return Self::default();
            }
        };
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load configuration, using defaults");
                Self::default()
            }
        }
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No configuration file");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config.sanitized())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    /// Directory photos are written to (e.g. `~/Pictures/EagleEye`)
    pub fn photos_dir(&self) -> PathBuf {
        if let Some(dir) = &self.photo_dir {
            return dir.clone();
        }
        dirs::picture_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
            .join(&self.album_name)
    }

    pub fn burst_timeout(&self) -> Duration {
        Duration::from_millis(self.burst_timeout_ms)
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            prefer_front: self.prefer_front_camera,
            reader_capacity: self.image_reader_capacity,
            max_preview: self.max_preview,
            ..ControllerSettings::default()
        }
    }

    /// Replace values that would make capture impossible
    fn sanitized(mut self) -> Self {
        if self.burst_count == 0 {
            warn!("burst_count must be at least 1, using default");
            self.burst_count = constants::BURST_FRAME_COUNT;
        }
        if self.image_reader_capacity == 0 {
            warn!("image_reader_capacity must be at least 1, using default");
            self.image_reader_capacity = constants::IMAGE_READER_CAPACITY;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "burst_count": 4, "unknown_field": true }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.burst_count, 4);
        assert_eq!(config.album_name, "EagleEye");
        assert_eq!(config.image_reader_capacity, 10);
    }

    #[test]
    fn test_zero_counts_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "burst_count": 0, "image_reader_capacity": 0 }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.burst_count, constants::BURST_FRAME_COUNT);
        assert_eq!(config.image_reader_capacity, constants::IMAGE_READER_CAPACITY);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse(_))));
    }
}
