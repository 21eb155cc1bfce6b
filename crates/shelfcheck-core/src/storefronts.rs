//! Storefront registry loaded from `config/storefronts.yaml`.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Which shipping payload shapes the probe driver attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentMode {
    /// Pickup-in-point payload only (delivery payload when the point has no
    /// known option id yet, to discover one).
    Pickup,
    /// Delivery payload with postal code / coordinates only.
    Delivery,
    /// Pickup first when the option id is known, then delivery.
    #[default]
    Auto,
}

impl std::fmt::Display for FulfillmentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FulfillmentMode::Pickup => write!(f, "pickup"),
            FulfillmentMode::Delivery => write!(f, "delivery"),
            FulfillmentMode::Auto => write!(f, "auto"),
        }
    }
}

/// How an item is judged available at a fulfillment point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityRule {
    /// The line item must report `available` AND a matching fulfillment
    /// option must be present.
    #[default]
    Strict,
    /// The line item flag alone decides. For storefronts whose simulation
    /// responses omit logistics options for in-stock items.
    LineItem,
}

impl std::fmt::Display for AvailabilityRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AvailabilityRule::Strict => write!(f, "strict"),
            AvailabilityRule::LineItem => write!(f, "line_item"),
        }
    }
}

/// A storefront-specific partition selecting pricing and availability rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesChannel {
    pub id: String,
    /// ISO 4217 code, e.g. `"BRL"`.
    pub currency: String,
    /// Culture tag, e.g. `"pt-BR"`.
    pub locale: String,
    /// ISO 3166 alpha-3 code used in shipping payloads, e.g. `"BRA"`.
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storefront {
    pub slug: String,
    pub base_url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub sales_channels: Vec<SalesChannel>,
    #[serde(default)]
    pub fulfillment_mode: FulfillmentMode,
    #[serde(default)]
    pub availability_rule: AvailabilityRule,
}

fn default_enabled() -> bool {
    true
}

impl Storefront {
    /// Base URL without a trailing slash, ready for path concatenation.
    #[must_use]
    pub fn origin(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    #[must_use]
    pub fn channel(&self, id: &str) -> Option<&SalesChannel> {
        self.sales_channels.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Deserialize)]
pub struct StorefrontsFile {
    pub storefronts: Vec<Storefront>,
}

impl StorefrontsFile {
    /// Enabled storefronts, optionally narrowed to a single slug.
    #[must_use]
    pub fn enabled(&self, slug_filter: Option<&str>) -> Vec<Storefront> {
        self.storefronts
            .iter()
            .filter(|s| s.enabled)
            .filter(|s| slug_filter.is_none_or(|slug| s.slug == slug))
            .cloned()
            .collect()
    }
}

/// Load and validate the storefront registry from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_storefronts(path: &Path) -> Result<StorefrontsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::StorefrontsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_storefronts(&content)
}

/// Parse and validate registry YAML already in memory.
///
/// # Errors
///
/// Returns `ConfigError` if the YAML is malformed or fails validation.
pub fn parse_storefronts(content: &str) -> Result<StorefrontsFile, ConfigError> {
    let file: StorefrontsFile = serde_yaml::from_str(content)?;
    validate_storefronts(&file)?;
    Ok(file)
}

fn validate_storefronts(file: &StorefrontsFile) -> Result<(), ConfigError> {
    let mut seen_slugs = HashSet::new();

    for storefront in &file.storefronts {
        if storefront.slug.trim().is_empty() {
            return Err(ConfigError::Validation(
                "storefront slug must be non-empty".to_string(),
            ));
        }

        if !seen_slugs.insert(storefront.slug.to_lowercase()) {
            return Err(ConfigError::Validation(format!(
                "duplicate storefront slug: '{}'",
                storefront.slug
            )));
        }

        let has_scheme = storefront.base_url.starts_with("https://")
            || storefront.base_url.starts_with("http://");
        let has_host = storefront
            .base_url
            .split_once("://")
            .is_some_and(|(_, rest)| !rest.trim_matches('/').is_empty());
        if !has_scheme || !has_host {
            return Err(ConfigError::Validation(format!(
                "storefront '{}' has invalid base_url '{}'",
                storefront.slug, storefront.base_url
            )));
        }

        if storefront.sales_channels.is_empty() {
            return Err(ConfigError::Validation(format!(
                "storefront '{}' must configure at least one sales channel",
                storefront.slug
            )));
        }

        let mut seen_channels = HashSet::new();
        for channel in &storefront.sales_channels {
            if channel.id.trim().is_empty() || !seen_channels.insert(channel.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "storefront '{}' has an empty or duplicate sales channel id '{}'",
                    storefront.slug, channel.id
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "storefronts_test.rs"]
mod tests;
