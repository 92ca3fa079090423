use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "STREAMBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/streambox.toml";
const ENV_PREFIX: &str = "STREAMBOX";
const ENV_SEPARATOR: &str = "__";
const TARGET_ENV_VAR: &str = "DISTRIBUTION_TARGET";

/// Path of the configuration file: `STREAMBOX_CONFIG` or the default location.
pub fn default_path() -> PathBuf {
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load(config_path: PathBuf) -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config);

    Ok(config)
}

/// The distribution target is deployment specific and only read from the
/// environment; an explicit config value wins.
fn load_secrets(config: &mut Config) {
    if config.distribution.destination.is_none() {
        if let Ok(target) = env::var(TARGET_ENV_VAR) {
            config.distribution.destination = Some(target);
        }
    }
}

/// Load configuration from a specific path and the process environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::debug!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // STREAMBOX__PIPELINE__DOWNLOAD_WORKERS -> pipeline.download_workers
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
