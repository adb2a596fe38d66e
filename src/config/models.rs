use crate::catalog::{Catalog, ProductEntry};
use crate::dates::DateFormat;
use crate::executor::{DownloadOptions, HttpConfig};
use crate::plan::OrbitSource;
use crate::pool::{FailurePolicy, PoolConfig};
use crate::session::{Credentials, SessionConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default = "default_products")]
    pub products: BTreeMap<String, ProductEntry>,
    #[serde(default)]
    pub orbits: OrbitSource,
    #[serde(default)]
    pub download: DownloadConfig,
    /// Login credentials (loaded from environment, not from config file)
    #[serde(skip)]
    pub credentials: Option<Credentials>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool: PoolSettings::default(),
            http: HttpConfig::default(),
            session: SessionConfig::default(),
            products: default_products(),
            orbits: OrbitSource::default(),
            download: DownloadConfig::default(),
            credentials: None,
        }
    }
}

impl Config {
    pub fn catalog(&self) -> Catalog {
        Catalog::new(self.products.clone())
    }

    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            overwrite: self.download.overwrite,
            write_buffer: self.http.write_buffer,
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolSettings {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Pause between launches; raised to 200 when lower
    #[serde(default = "default_launch_delay_ms")]
    pub launch_delay_ms: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_timeout_secs: Option<u64>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            launch_delay_ms: default_launch_delay_ms(),
            progress_interval_ms: default_progress_interval_ms(),
            task_timeout_secs: None,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl PoolSettings {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            concurrency: self.concurrency,
            launch_delay: Duration::from_millis(self.launch_delay_ms),
            progress_interval: Duration::from_millis(self.progress_interval_ms),
            task_timeout: self.task_timeout_secs.map(Duration::from_secs),
            failure_policy: self.failure_policy,
        }
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_launch_delay_ms() -> u64 {
    200
}

fn default_progress_interval_ms() -> u64 {
    1000
}

/// Local download tree
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    #[serde(default = "default_outdir")]
    pub outdir: PathBuf,
    #[serde(default)]
    pub overwrite: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            outdir: default_outdir(),
            overwrite: false,
        }
    }
}

fn default_outdir() -> PathBuf {
    PathBuf::from(".")
}

fn default_products() -> BTreeMap<String, ProductEntry> {
    BTreeMap::from([
        (
            "0481".to_string(),
            ProductEntry {
                url: "https://daacdata.apps.nsidc.org/pub/DATASETS/nsidc0481_MEASURES_greenland_TSX_Vel/TSX/"
                    .to_string(),
                regions: true,
                date_format: DateFormat::MonthDayYear,
            },
        ),
        (
            "0731".to_string(),
            ProductEntry {
                url: "https://daacdata.apps.nsidc.org/pub/DATASETS/nsidc0731_MEASURES_greenland_monthly_vel/"
                    .to_string(),
                regions: false,
                date_format: DateFormat::Iso,
            },
        ),
    ])
}
