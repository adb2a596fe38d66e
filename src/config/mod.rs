//! Configuration management for gimpfetch
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. `.env` file
//! 4. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use gimpfetch::config::Config;
//!
//! let config = Config::load(None).expect("Failed to load configuration");
//! println!("Downloading into: {}", config.download.outdir.display());
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `GIMPFETCH__<section>__<key>`
//!
//! Examples:
//! - `GIMPFETCH__POOL__CONCURRENCY=8`
//! - `GIMPFETCH__DOWNLOAD__OUTDIR=/data/gimp`
//! - `GIMPFETCH__HTTP__WRITE_BUFFER=1MB`
//!
//! Earthdata credentials are read from `GIMPFETCH_USERNAME` and
//! `GIMPFETCH_PASSWORD` only.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/gimpfetch.toml`.
//! This can be overridden using the `GIMPFETCH_CONFIG` environment variable
//! or the `--config` flag.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{Config, DownloadConfig, PoolSettings};
pub use sources::config_path;
pub use validation::ValidationError;

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Failed to render configuration: {0}")]
    RenderError(#[from] toml::ser::Error),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// `path` overrides `GIMPFETCH_CONFIG` and the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file is malformed
    /// - Validation fails (zero concurrency, bad URLs, etc.)
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = sources::load(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path, skipping `.env` and secrets
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
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
[pool]
concurrency = 2
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.pool.concurrency, 2);
        assert!(config.credentials.is_none());
    }

    #[test]
    fn test_validation_catches_zero_concurrency() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[pool]
concurrency = 0
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::ZeroConcurrency)
        ));
    }

    #[test]
    fn test_rendered_config_loads_back() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("rendered.toml");

        let rendered = Config::default().to_toml().unwrap();
        fs::write(&config_path, &rendered).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.products.len(), 2);
        assert_eq!(config.http.write_buffer, ByteSize::kib(256));
        assert_eq!(config.orbits.satellites, vec!["S1A", "S1B"]);
    }

    #[test]
    fn test_full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[pool]
concurrency = 4
launch_delay_ms = 250
progress_interval_ms = 500
failure_policy = "isolate"

[http]
connect_timeout_secs = 20
max_retries = 2
retry_backoff_ms = 500
write_buffer = "512KB"

[session]
cookie_jar = "/tmp/jar.json"
profile_url = "https://urs.example.com/profile"
login_url = "https://data.example.com/pub/"

[products.0481]
url = "https://data.example.com/pub/nsidc0481/TSX/"
regions = true
date_format = "month-day-year"

[products.0731]
url = "https://data.example.com/pub/nsidc0731/"
date_format = "iso"

[orbits]
base_url = "https://orbits.example.com/POEORB/"

[download]
outdir = "gimp"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();

        assert_eq!(config.pool.launch_delay_ms, 250);
        assert_eq!(config.http.connect_timeout_secs, 20);
        assert_eq!(config.http.write_buffer, ByteSize::kib(512));
        assert_eq!(
            config.session.cookie_jar_path(),
            PathBuf::from("/tmp/jar.json")
        );
        let catalog = config.catalog();
        assert!(catalog.lookup("0481").unwrap().regions);
        assert!(!catalog.lookup("0731").unwrap().regions);
        assert_eq!(config.orbits.satellites.len(), 2);
    }
}
