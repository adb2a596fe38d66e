use super::models::Config;
use crate::pool::MAX_PROGRESS_INTERVAL;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("pool.concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("pool.progress_interval_ms must be between 1 and {max}, got {actual}")]
    InvalidProgressInterval { actual: u64, max: u64 },

    #[error("pool.task_timeout_secs must be positive")]
    ZeroTaskTimeout,

    #[error("no products configured")]
    NoProducts,

    #[error("product '{product}' has an empty url")]
    EmptyProductUrl { product: String },

    #[error("{field} must be an http(s) URL, got '{url}'")]
    InvalidUrl { field: String, url: String },

    #[error("orbits.satellites must name at least one satellite")]
    NoSatellites,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_pool(config)?;
    validate_products(config)?;
    validate_urls(config)?;
    if config.orbits.satellites.is_empty() {
        return Err(ValidationError::NoSatellites);
    }
    Ok(())
}

fn validate_pool(config: &Config) -> Result<(), ValidationError> {
    let pool = &config.pool;
    if pool.concurrency == 0 {
        return Err(ValidationError::ZeroConcurrency);
    }

    let max = MAX_PROGRESS_INTERVAL.as_millis() as u64;
    if pool.progress_interval_ms == 0 || pool.progress_interval_ms > max {
        return Err(ValidationError::InvalidProgressInterval {
            actual: pool.progress_interval_ms,
            max,
        });
    }

    if pool.task_timeout_secs == Some(0) {
        return Err(ValidationError::ZeroTaskTimeout);
    }
    Ok(())
}

fn validate_products(config: &Config) -> Result<(), ValidationError> {
    if config.products.is_empty() {
        return Err(ValidationError::NoProducts);
    }

    for (id, product) in &config.products {
        if product.url.trim().is_empty() {
            return Err(ValidationError::EmptyProductUrl {
                product: id.clone(),
            });
        }
        check_url(&format!("products.{id}.url"), &product.url)?;
    }
    Ok(())
}

fn validate_urls(config: &Config) -> Result<(), ValidationError> {
    check_url("session.profile_url", &config.session.profile_url)?;
    check_url("session.login_url", &config.session.login_url)?;
    check_url("orbits.base_url", &config.orbits.base_url)?;
    Ok(())
}

fn check_url(field: &str, url: &str) -> Result<(), ValidationError> {
    let valid = reqwest::Url::parse(url)
        .map(|parsed| matches!(parsed.scheme(), "http" | "https") && parsed.has_host())
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidUrl {
            field: field.to_string(),
            url: url.to_string(),
        })
    }
}
