//! Product catalog
//!
//! Maps product ids such as `0481` to the server directory holding them and
//! to how their directory names carry dates.

use crate::dates::DateFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("product '{id}' is not in the catalog (known: {known})")]
    UnknownProduct { id: String, known: String },

    #[error("product '{0}' does not have regions")]
    RegionsUnsupported(String),
}

/// One product's location on the server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProductEntry {
    pub url: String,
    /// Whether directories are grouped under per-glacier region folders
    #[serde(default)]
    pub regions: bool,
    #[serde(default)]
    pub date_format: DateFormat,
}

impl ProductEntry {
    /// Listing URL of the product, or of one of its regions
    pub fn listing_url(&self, id: &str, region: Option<&str>) -> Result<String, CatalogError> {
        match region {
            None => Ok(with_trailing_slash(&self.url)),
            Some(_) if !self.regions => Err(CatalogError::RegionsUnsupported(id.to_string())),
            Some(region) => Ok(format!(
                "{}{}/",
                with_trailing_slash(&self.url),
                normalize_region(region)
            )),
        }
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: BTreeMap<String, ProductEntry>,
}

impl Catalog {
    pub fn new(products: BTreeMap<String, ProductEntry>) -> Self {
        Self { products }
    }

    pub fn lookup(&self, id: &str) -> Result<&ProductEntry, CatalogError> {
        self.products
            .get(id)
            .ok_or_else(|| CatalogError::UnknownProduct {
                id: id.to_string(),
                known: self.ids().collect::<Vec<_>>().join(", "),
            })
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.products.keys().map(String::as_str)
    }
}

/// Region folder name for a region as typed by the user
///
/// Region folders carry hundredths of a degree, so `W61.1N` becomes
/// `W61.10N`. Anything else is returned unchanged.
pub fn normalize_region(region: &str) -> String {
    let Some(dot) = region.find('.') else {
        return region.to_string();
    };
    let after = &region[dot + 1..];
    let digits = after.chars().take_while(char::is_ascii_digit).count();
    if digits == 1 {
        let split = dot + 2;
        format!("{}0{}", &region[..split], &region[split..])
    } else {
        region.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        let mut products = BTreeMap::new();
        products.insert(
            "0481".to_string(),
            ProductEntry {
                url: "https://data.example.com/nsidc0481/TSX".to_string(),
                regions: true,
                date_format: DateFormat::MonthDayYear,
            },
        );
        products.insert(
            "0731".to_string(),
            ProductEntry {
                url: "https://data.example.com/nsidc0731/".to_string(),
                regions: false,
                date_format: DateFormat::Iso,
            },
        );
        Catalog::new(products)
    }

    #[test]
    fn test_normalize_region() {
        assert_eq!(normalize_region("W61.1N"), "W61.10N");
        assert_eq!(normalize_region("W61.10N"), "W61.10N");
        assert_eq!(normalize_region("E10.5S"), "E10.50S");
        assert_eq!(normalize_region("W61N"), "W61N");
        assert_eq!(normalize_region("W61.N"), "W61.N");
    }

    #[test]
    fn test_lookup_unknown_product() {
        let err = catalog().lookup("9999").unwrap_err();
        assert_eq!(
            err,
            CatalogError::UnknownProduct {
                id: "9999".to_string(),
                known: "0481, 0731".to_string(),
            }
        );
    }

    #[test]
    fn test_listing_urls() {
        let catalog = catalog();
        let tsx = catalog.lookup("0481").unwrap();
        assert_eq!(
            tsx.listing_url("0481", None).unwrap(),
            "https://data.example.com/nsidc0481/TSX/"
        );
        assert_eq!(
            tsx.listing_url("0481", Some("W61.1N")).unwrap(),
            "https://data.example.com/nsidc0481/TSX/W61.10N/"
        );

        let monthly = catalog.lookup("0731").unwrap();
        assert_eq!(
            monthly.listing_url("0731", Some("W61.1N")),
            Err(CatalogError::RegionsUnsupported("0731".to_string()))
        );
    }
}
