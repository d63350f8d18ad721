//! Application configuration.
//!
//! A small TOML file holds the aisstream.io API key and optional overrides.
//! The `BROVAKT_API_KEY` environment variable (also via `.env`) takes
//! precedence over the file so the secret can stay out of version control.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Fixed upstream endpoint for the AIS position stream.
pub const AIS_STREAM_ENDPOINT: &str = "wss://stream.aisstream.io/v0/stream";

/// Canal bounding box corners, NW then SE, sent verbatim in the
/// subscription frame and used to validate first fixes.
pub const CANAL_BBOX_NW: (f64, f64) = (58.335, 12.250);
pub const CANAL_BBOX_SE: (f64, f64) = (58.255, 12.330);

/// Top-level configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// aisstream.io API key (secret).
    #[serde(default)]
    pub api_key: String,
    /// Seconds between subscription keep-alive re-sends.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Maximum reconnect attempts before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_keepalive_secs() -> u64 {
    60
}

fn default_max_reconnect_attempts() -> u32 {
    20
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            keepalive_secs: default_keepalive_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl AppConfig {
    /// Load config from a TOML file, then apply the environment override.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let mut config: AppConfig =
            toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
        config.apply_env_override();
        Ok(config)
    }

    /// Load if the file exists, otherwise start from defaults. The
    /// environment override applies either way.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let mut config = AppConfig::default();
            config.apply_env_override();
            Ok(config)
        }
    }

    fn apply_env_override(&mut self) {
        if let Ok(key) = std::env::var("BROVAKT_API_KEY")
            && !key.trim().is_empty()
        {
            self.api_key = key.trim().to_string();
        }
    }

    /// Save config to a TOML file (atomic: write to .tmp then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, contents)
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", tmp_path, path))?;
        Ok(())
    }

    /// Validate that the config is complete enough to run.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            bail!("api_key is not set (config file or BROVAKT_API_KEY)");
        }
        if self.keepalive_secs == 0 {
            bail!("keepalive_secs must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_round_trip_through_file() {
        unsafe {
            std::env::remove_var("BROVAKT_API_KEY");
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brovakt.toml");

        let config = AppConfig {
            api_key: "abc123".into(),
            keepalive_secs: 45,
            max_reconnect_attempts: 7,
        };
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.api_key, "abc123");
        assert_eq!(loaded.keepalive_secs, 45);
        assert_eq!(loaded.max_reconnect_attempts, 7);
        // No stray temp file left behind
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    #[serial]
    fn test_env_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brovakt.toml");
        AppConfig {
            api_key: "from-file".into(),
            ..Default::default()
        }
        .save(&path)
        .unwrap();

        unsafe {
            std::env::set_var("BROVAKT_API_KEY", "from-env");
        }
        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.api_key, "from-env");
        unsafe {
            std::env::remove_var("BROVAKT_API_KEY");
        }
    }

    #[test]
    #[serial]
    fn test_missing_file_falls_back_to_defaults() {
        unsafe {
            std::env::remove_var("BROVAKT_API_KEY");
        }
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.keepalive_secs, 60);
        assert!(config.validate().is_err(), "empty api_key must not validate");
    }

    #[test]
    #[serial]
    fn test_validate_complete_config() {
        unsafe {
            std::env::remove_var("BROVAKT_API_KEY");
        }
        let config = AppConfig {
            api_key: "k".into(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
