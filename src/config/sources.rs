use super::models::Config;
use crate::session::Credentials;
use config::{ConfigError, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};

const CONFIG_ENV_VAR: &str = "GIMPFETCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/gimpfetch.toml";
const ENV_PREFIX: &str = "GIMPFETCH";
const ENV_SEPARATOR: &str = "__";

/// Config file to read: explicit path, then `GIMPFETCH_CONFIG`, then the default
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let mut config = load_from_sources(config_path(explicit))?;
    load_secrets(&mut config);
    Ok(config)
}

/// Credentials only ever come from the environment
fn load_secrets(config: &mut Config) {
    config.credentials = Credentials::from_env();
}

/// Load configuration from a specific path and environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).format(FileFormat::Toml).required(false));
    } else {
        tracing::debug!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // GIMPFETCH__POOL__CONCURRENCY -> pool.concurrency
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::DateFormat;
    use crate::pool::FailurePolicy;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.pool.concurrency, 4);
        assert_eq!(config.products.len(), 2);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[pool]
concurrency = 6
task_timeout_secs = 900
failure_policy = "abort"

[http]
max_retries = 5
write_buffer = "1MB"

[download]
outdir = "/data/gimp"
overwrite = true
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.pool.concurrency, 6);
        assert_eq!(config.pool.task_timeout_secs, Some(900));
        assert_eq!(config.pool.failure_policy, FailurePolicy::AbortOnFirstError);
        assert_eq!(config.http.max_retries, 5);
        assert_eq!(config.http.write_buffer.as_u64(), 1024 * 1024);
        assert_eq!(config.download.outdir, PathBuf::from("/data/gimp"));
        assert!(config.download.overwrite);
    }

    #[test]
    fn test_products_replace_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[products.velocity]
url = "https://data.example.com/velocity/"
date_format = "iso"

[orbits]
base_url = "https://orbits.example.com/POEORB/"
satellites = ["S1A"]
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.products.len(), 1);
        let product = &config.products["velocity"];
        assert!(!product.regions);
        assert_eq!(product.date_format, DateFormat::Iso);
        assert_eq!(config.orbits.satellites, vec!["S1A"]);
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = config_path(Some(Path::new("/etc/gimpfetch.toml")));
        assert_eq!(path, PathBuf::from("/etc/gimpfetch.toml"));
    }
}
