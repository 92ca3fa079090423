//! Configuration management for StreamBox
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use streambox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Download workers: {}", config.pipeline.download_workers);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `STREAMBOX__<section>__<key>`
//!
//! Examples:
//! - `STREAMBOX__PIPELINE__DOWNLOAD_WORKERS=5`
//! - `STREAMBOX__MEDIA__SPLIT_THRESHOLD=1GB`
//! - `STREAMBOX__DISTRIBUTION__ENABLED=true`
//!
//! The distribution target is read from `DISTRIBUTION_TARGET` when the file
//! does not set one.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/streambox.toml`.
//! This can be overridden using the `STREAMBOX_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    Config, DedupConfig, DistributionConfig, DistributionProvider, HttpSettings, MediaConfig,
    PipelineConfig, ProgressConfig,
};
pub use validation::ValidationError;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`STREAMBOX__*`, `DISTRIBUTION_TARGET`)
    /// 2. TOML file (default: `config/streambox.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or validation
    /// fails (zero-sized pools, remote mode without a destination).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(sources::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Re-run validation, e.g. after command-line overrides were applied.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[pipeline]
download_workers = 2
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.pipeline.download_workers, 2);
        assert_eq!(config.pipeline.segment_concurrency, 8);
    }

    #[test]
    fn test_validation_catches_zero_queue() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[pipeline]\nqueue_size = 0\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result,
            Err(ConfigError::ValidationError(ValidationError::ZeroSized { .. }))
        ));
    }

    #[test]
    fn test_full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[pipeline]
dispatch_workers = 1
download_workers = 4
upload_workers = 1
queue_size = 6
segment_concurrency = 16
output_dir = "downloads"
stats_interval_secs = 30

[http]
connect_timeout_secs = 5
request_timeout_secs = 90
user_agent = "test-agent"

[progress]
enabled = false
render_interval_ms = 250

[media]
ffmpeg_path = "/usr/local/bin/ffmpeg"
split_threshold = "500MB"

[distribution]
enabled = true
provider = "local"
root = "published"
destination = "channel-42"

[dedup]
path = "state/dedup"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();

        assert_eq!(config.pipeline.queue_size, 6);
        assert_eq!(config.pipeline.segment_concurrency, 16);
        assert_eq!(config.http.user_agent, "test-agent");
        assert!(!config.progress.enabled);
        assert_eq!(config.media.split_threshold.whole_mib(), 500);
        assert_eq!(config.distribution.provider, DistributionProvider::Local);
        assert_eq!(config.dedup.path, PathBuf::from("state/dedup"));
    }
}
