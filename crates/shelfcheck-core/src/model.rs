//! Data model shared by the probe engine, persistence, and the CLI.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::storefronts::SalesChannel;

/// Latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// A physical location capable of servicing an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentPoint {
    /// Stable key, unique within its storefront.
    pub key: String,
    pub postal_code: Option<String>,
    pub geo: Option<GeoPoint>,
    /// Storefront-side pickup option id. `None` until discovered.
    pub external_option_id: Option<String>,
}

/// A catalog entry resolved to a specific storefront's SKU and seller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedItem {
    pub sku_id: String,
    pub seller_id: String,
    /// Cross-storefront key (e.g. an EAN/UPC) correlating the same product.
    pub merchandise_key: String,
}

/// One (storefront, fulfillment point, item, sales channel) availability check.
#[derive(Debug, Clone)]
pub struct ProbeTask {
    pub storefront: String,
    pub point: FulfillmentPoint,
    pub item: TrackedItem,
    pub channel: SalesChannel,
}

impl ProbeTask {
    #[must_use]
    pub fn identity(&self) -> ResultIdentity {
        ResultIdentity {
            storefront: self.storefront.clone(),
            fulfillment_point: self.point.key.clone(),
            sku_id: self.item.sku_id.clone(),
            seller_id: self.item.seller_id.clone(),
            sales_channel: self.channel.id.clone(),
        }
    }
}

/// Composite identity of a persisted probe result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultIdentity {
    pub storefront: String,
    pub fulfillment_point: String,
    pub sku_id: String,
    pub seller_id: String,
    pub sales_channel: String,
}

impl std::fmt::Display for ResultIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}:{}@{}",
            self.storefront, self.fulfillment_point, self.sku_id, self.seller_id, self.sales_channel
        )
    }
}

/// Failure taxonomy recorded alongside unsuccessful probe results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network error, timeout, 5xx, or rate limit; retried before giving up.
    Transient,
    /// Anti-automation layer intercepted the request.
    Blocked,
    /// Malformed request or unexpected response shape.
    Permanent,
    /// Response parsed but lacked an expected field.
    PartialData,
}

impl ErrorClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Blocked => "blocked",
            ErrorClass::Permanent => "permanent",
            ErrorClass::PartialData => "partial_data",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted outcome of one probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub identity: ResultIdentity,
    pub merchandise_key: String,
    pub available: bool,
    pub quantity: Option<i32>,
    /// Major currency units.
    pub price: Option<Decimal>,
    pub list_price: Option<Decimal>,
    pub currency_code: String,
    pub captured_at: DateTime<Utc>,
    pub error_class: Option<ErrorClass>,
    pub error_message: Option<String>,
    /// Bounded raw excerpt of the response that produced this result.
    pub diagnostic: Option<String>,
    /// Fulfillment option the availability verdict was based on.
    pub fulfillment_option_id: Option<String>,
}

impl ProbeResult {
    /// Whether `self` may replace `stored` under last-write-wins.
    #[must_use]
    pub fn supersedes(&self, stored: &ProbeResult) -> bool {
        self.captured_at >= stored.captured_at
    }
}

/// Truncate `raw` to at most `max_bytes`, backing off to a UTF-8 boundary.
#[must_use]
pub fn truncate_diagnostic(raw: &str, max_bytes: usize) -> String {
    if raw.len() <= max_bytes {
        return raw.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !raw.is_char_boundary(end) {
        end -= 1;
    }
    raw[..end].to_owned()
}
