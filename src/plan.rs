//! Task list production
//!
//! Turns a product/region/date selection, or the state of a local orbit
//! directory, into the ordered [`Task`] list the pool runs.

use crate::catalog::{Catalog, CatalogError};
use crate::dates::{self, DateRange};
use crate::listing::{self, Listing, ListingError};
use crate::task::Task;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use time::{Date, Duration};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Listing(#[from] ListingError),

    #[error("no orbit files for {satellites} in {dir}; download one to start from")]
    NoLocalOrbits { dir: PathBuf, satellites: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where orbit files are published
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrbitSource {
    /// Root holding `YYYY/MM/DD/` day directories
    #[serde(default = "default_orbit_base_url")]
    pub base_url: String,
    #[serde(default = "default_satellites")]
    pub satellites: Vec<String>,
}

impl Default for OrbitSource {
    fn default() -> Self {
        Self {
            base_url: default_orbit_base_url(),
            satellites: default_satellites(),
        }
    }
}

fn default_orbit_base_url() -> String {
    "http://aux.sentinel1.eo.esa.int/POEORB/".to_string()
}

fn default_satellites() -> Vec<String> {
    vec!["S1A".to_string(), "S1B".to_string()]
}

impl OrbitSource {
    fn day_url(&self, day: Date) -> String {
        format!(
            "{}{:04}/{:02}/{:02}/",
            with_trailing_slash(&self.base_url),
            day.year(),
            u8::from(day.month()),
            day.day()
        )
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

/// Builds task lists from catalog lookups and server listings
pub struct Planner {
    listing: Arc<dyn Listing>,
    catalog: Catalog,
}

impl Planner {
    pub fn new(listing: Arc<dyn Listing>, catalog: Catalog) -> Self {
        Self { listing, catalog }
    }

    /// Directory names of a product (or one of its regions), optionally
    /// limited to those whose date span overlaps `range`
    pub async fn directories(
        &self,
        product: &str,
        region: Option<&str>,
        range: Option<&DateRange>,
    ) -> Result<Vec<String>, PlanError> {
        let entry = self.catalog.lookup(product)?;
        let url = entry.listing_url(product, region)?;
        let names = self.listing.entries(&url).await?;
        let total = names.len();

        let names = match range {
            Some(range) => range.select(names, entry.date_format),
            None => names,
        };
        info!(product, url, total, selected = names.len(), "Listed product directories");
        Ok(names)
    }

    /// One task per file in each of `dirs`, mirrored under `outdir`
    pub async fn tasks(
        &self,
        product: &str,
        region: Option<&str>,
        dirs: &[String],
        outdir: &Path,
    ) -> Result<Vec<Task>, PlanError> {
        let entry = self.catalog.lookup(product)?;
        let base = entry.listing_url(product, region)?;

        let mut tasks = Vec::new();
        for dir in dirs {
            if !is_plain_name(dir) {
                warn!(dir, "Skipping directory name that is not a single path segment");
                continue;
            }
            let dir_url = format!("{base}{dir}/");
            let files = self.listing.entries(&dir_url).await?;
            debug!(dir, files = files.len(), "Listed directory");
            for file in files {
                if !is_plain_name(&file) {
                    warn!(dir, file, "Skipping file name that is not a single path segment");
                    continue;
                }
                tasks.push(Task::new(format!("{dir_url}{file}"), outdir.join(dir).join(&file)));
            }
        }
        Ok(tasks)
    }

    /// Orbit files published after the newest ones already in `dir`
    ///
    /// The walk starts the day after the earliest of the per-satellite newest
    /// local production dates and runs through `today`. Days the server has
    /// no directory for are skipped.
    pub async fn orbit_tasks(
        &self,
        source: &OrbitSource,
        dir: &Path,
        today: Date,
    ) -> Result<Vec<Task>, PlanError> {
        let newest = newest_local_orbits(dir, &source.satellites)?;
        let Some(start) = newest.values().min().copied() else {
            return Err(PlanError::NoLocalOrbits {
                dir: dir.to_path_buf(),
                satellites: source.satellites.join(", "),
            });
        };
        info!(dir = %dir.display(), after = %start, "Refreshing orbit files");

        let mut tasks = Vec::new();
        let mut seen = HashSet::new();
        let mut day = start;
        while let Some(next) = day.checked_add(Duration::days(1)) {
            day = next;
            if day > today {
                break;
            }

            let url = source.day_url(day);
            let entries = match self.listing.entries(&url).await {
                Ok(entries) => entries,
                Err(e) if e.is_not_found() => {
                    debug!(url, "No orbit directory for day");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            for file in listing::newest_orbits(&entries, &source.satellites) {
                if !is_plain_name(&file) {
                    warn!(url, file, "Skipping orbit name that is not a single path segment");
                    continue;
                }
                if seen.insert(file.clone()) {
                    tasks.push(Task::new(format!("{url}{file}"), dir.join(&file)));
                }
            }
        }
        Ok(tasks)
    }
}

/// Server-supplied names may only name an entry inside the target directory
fn is_plain_name(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Newest production date per satellite among the `.EOF` files in `dir`
fn newest_local_orbits(
    dir: &Path,
    satellites: &[String],
) -> Result<BTreeMap<String, Date>, PlanError> {
    let read_error = |source| PlanError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut newest: BTreeMap<String, Date> = BTreeMap::new();
    for entry in std::fs::read_dir(dir).map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".EOF") {
            continue;
        }
        let Some(sat) = satellites.iter().find(|s| name.starts_with(s.as_str())) else {
            continue;
        };
        let Some(date) = dates::orbit_production_date(&name) else {
            debug!(name, "Orbit file name has no production date");
            continue;
        };
        newest
            .entry(sat.clone())
            .and_modify(|d| *d = (*d).max(date))
            .or_insert(date);
    }
    Ok(newest)
}
