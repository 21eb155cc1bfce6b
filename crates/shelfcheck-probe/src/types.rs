//! Wire types for the storefront checkout ("order form") API.
//!
//! ## Observed shape
//!
//! ### Prices
//! `sellingPrice`, `price` and `listPrice` are integers in minor currency
//! units (`1999` is 19.99). `sellingPrice` already includes promotions and is
//! preferred; some storefronts omit it on unavailable lines.
//!
//! ### `availability`
//! A string on each line item. `"available"` is the only in-stock value;
//! others seen include `"withoutStock"`, `"cannotBeDelivered"` and
//! `"withoutPriceFulfillment"`.
//!
//! ### Logistics
//! `shippingData.logisticsInfo` has one entry per line, linked by `itemIndex`.
//! Options are listed under `slas`; older storefront versions call the same
//! list `options`. Pickup options carry `deliveryChannel = "pickup-in-point"`
//! and usually a `pickupPointId` of the form `"{seller}_{storeId}"`.
//! `available` on an option is absent on most storefronts; absent means true.
//!
//! Every field is optional or defaulted because storefronts drop sections
//! they were not asked for.

use serde::{Deserialize, Serialize};

pub const PICKUP_CHANNEL: &str = "pickup-in-point";

/// Response body of every order-form endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderForm {
    #[serde(default)]
    pub order_form_id: Option<String>,
    #[serde(default)]
    pub items: Vec<OrderFormItem>,
    #[serde(default)]
    pub shipping_data: Option<ShippingData>,
    #[serde(default)]
    pub store_preferences_data: Option<StorePreferences>,
    #[serde(default)]
    pub messages: Vec<OrderFormMessage>,
}

impl OrderForm {
    /// Logistics entries, empty when the section is missing.
    #[must_use]
    pub fn logistics(&self) -> &[LogisticsInfo] {
        self.shipping_data
            .as_ref()
            .map_or(&[], |s| s.logistics_info.as_slice())
    }

    #[must_use]
    pub fn currency_code(&self) -> Option<&str> {
        self.store_preferences_data
            .as_ref()
            .and_then(|p| p.currency_code.as_deref())
            .filter(|c| !c.is_empty())
    }

    /// Storefront messages joined for diagnostics, e.g.
    /// `"error: Item 42 out of stock at this store"`.
    #[must_use]
    pub fn message_text(&self) -> Option<String> {
        let texts: Vec<String> = self
            .messages
            .iter()
            .filter_map(|m| {
                let text = m.text.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
                Some(match m.status.as_deref() {
                    Some(status) if !status.is_empty() => format!("{status}: {text}"),
                    _ => text.to_owned(),
                })
            })
            .collect();
        (!texts.is_empty()).then(|| texts.join(" | "))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFormItem {
    /// SKU id.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub seller: String,
    #[serde(default)]
    pub availability: Option<String>,
    #[serde(default)]
    pub selling_price: Option<i64>,
    #[serde(default)]
    pub price: Option<i64>,
    #[serde(default)]
    pub list_price: Option<i64>,
    #[serde(default)]
    pub quantity: Option<i32>,
}

impl OrderFormItem {
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.availability.as_deref() == Some("available")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingData {
    #[serde(default)]
    pub logistics_info: Vec<LogisticsInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogisticsInfo {
    #[serde(default)]
    pub item_index: Option<usize>,
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default, alias = "options")]
    pub slas: Vec<Sla>,
}

/// One fulfillment option offered for a line.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sla {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub delivery_channel: Option<String>,
    #[serde(default)]
    pub pickup_point_id: Option<String>,
    #[serde(default)]
    pub available: Option<bool>,
    #[serde(default)]
    pub pickup_store_info: Option<PickupStoreInfo>,
}

impl Sla {
    #[must_use]
    pub fn is_pickup(&self) -> bool {
        self.delivery_channel.as_deref() == Some(PICKUP_CHANNEL)
    }

    /// Whether this option names the fulfillment point `option_id`.
    #[must_use]
    pub fn matches(&self, option_id: &str) -> bool {
        self.id == option_id
            || self.pickup_point_id.as_deref() == Some(option_id)
            || self
                .pickup_store_info
                .as_ref()
                .and_then(|info| info.address.as_ref())
                .and_then(|a| a.address_id.as_deref())
                == Some(option_id)
    }

    /// The identifier to persist for a discovered pickup option.
    #[must_use]
    pub fn external_id(&self) -> &str {
        self.pickup_point_id.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupStoreInfo {
    #[serde(default)]
    pub address: Option<PickupAddress>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupAddress {
    #[serde(default)]
    pub address_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePreferences {
    #[serde(default)]
    pub currency_code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFormMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

// -- request payloads --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub expected_order_form_sections: &'static [&'static str],
}

impl Default for CreateSessionRequest {
    fn default() -> Self {
        Self {
            expected_order_form_sections: &[
                "items",
                "shippingData",
                "storePreferencesData",
                "messages",
            ],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemsRequest {
    pub order_items: Vec<OrderItemPayload>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemPayload {
    pub id: String,
    pub quantity: u32,
    pub seller: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAttachment {
    pub clear_address_if_postal_code_not_found: bool,
    pub selected_addresses: Vec<AddressPayload>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logistics_info: Vec<LogisticsSelection>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressPayload {
    /// `"residential"` for delivery, `"search"` for pickup lookups.
    pub address_type: &'static str,
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    /// `[lon, lat]`, the order the API expects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_coordinates: Option<[f64; 2]>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogisticsSelection {
    pub item_index: usize,
    pub selected_delivery_channel: &'static str,
    pub selected_sla: String,
}
