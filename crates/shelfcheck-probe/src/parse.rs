//! Turns order-form responses into per-item verdicts.
//!
//! Downstream code only ever sees [`ItemVerdict`]; structural presence
//! checks on the raw payload stay in this module.

use rust_decimal::Decimal;
use shelfcheck_core::{AvailabilityRule, FulfillmentMode, FulfillmentPoint, TrackedItem};

use crate::types::{LogisticsInfo, OrderForm, OrderFormItem, Sla};

pub const NO_MATCHING_OPTION: &str = "no matching fulfillment option";

/// Which shipping payload produced the simulation being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShippingShape {
    /// Pickup-in-point selection naming the point's option id.
    Pickup,
    /// Address payload with postal code and/or coordinates.
    Delivery,
}

impl std::fmt::Display for ShippingShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShippingShape::Pickup => write!(f, "pickup"),
            ShippingShape::Delivery => write!(f, "delivery"),
        }
    }
}

/// Outcome for one staged item. "Not available" is a normal verdict, never
/// an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemVerdict {
    Available {
        price: Option<Decimal>,
        list_price: Option<Decimal>,
        quantity: Option<i32>,
        /// Fulfillment option the verdict was based on.
        option_id: Option<String>,
    },
    Unavailable {
        reason: String,
        price: Option<Decimal>,
        list_price: Option<Decimal>,
    },
    /// The response lacked a field needed to decide.
    Unparseable { reason: String, raw: String },
}

impl ItemVerdict {
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, ItemVerdict::Available { .. })
    }
}

/// Everything the parser needs to know about the simulation request.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub items: &'a [TrackedItem],
    pub point: &'a FulfillmentPoint,
    pub shape: ShippingShape,
    pub mode: FulfillmentMode,
    pub rule: AvailabilityRule,
}

#[derive(Debug, Clone)]
pub struct ParsedSimulation {
    /// One verdict per requested item, same order.
    pub verdicts: Vec<ItemVerdict>,
    /// Pickup option id revealed by the response that differs from the
    /// point's known id (or the point had none).
    pub discovered_option_id: Option<String>,
    pub currency_code: Option<String>,
}

/// Converts a minor-unit amount (cents) into major units.
#[must_use]
pub fn minor_to_major(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// Verdicts decidable right after staging: lines the storefront already
/// reports as unavailable, and lines missing from the response. `None`
/// means the item needs a fulfillment simulation.
#[must_use]
pub fn staged_verdicts(form: &OrderForm, items: &[TrackedItem], raw: &str) -> Vec<Option<ItemVerdict>> {
    items
        .iter()
        .map(|item| match find_line(form, item) {
            None => Some(missing_line(form, item, raw)),
            Some((_, line)) => match line.availability.as_deref() {
                Some(state) if state != "available" => Some(ItemVerdict::Unavailable {
                    reason: with_messages(form, format!("line availability: {state}")),
                    price: line_price(line),
                    list_price: line.list_price.map(minor_to_major),
                }),
                _ => None,
            },
        })
        .collect()
}

/// Parses a simulated order form for every item in `ctx`.
#[must_use]
pub fn parse_simulation(form: &OrderForm, ctx: &ParseContext<'_>, raw: &str) -> ParsedSimulation {
    let known_id = ctx.point.external_option_id.as_deref();
    let mut discovered_option_id = None;

    let verdicts = ctx
        .items
        .iter()
        .map(|item| {
            let Some((index, line)) = find_line(form, item) else {
                return missing_line(form, item, raw);
            };
            let Some(availability) = line.availability.as_deref() else {
                return ItemVerdict::Unparseable {
                    reason: format!("line for sku {} has no availability", item.sku_id),
                    raw: raw.to_owned(),
                };
            };

            let price = line_price(line);
            let list_price = line.list_price.map(minor_to_major);
            let option = find_logistics(form, index, &item.sku_id)
                .and_then(|l| match_option(&l.slas, known_id, ctx.shape, ctx.mode));

            if let Some(sla) = option {
                if sla.is_pickup() && known_id != Some(sla.external_id()) {
                    discovered_option_id.get_or_insert_with(|| sla.external_id().to_owned());
                }
            }

            if !line.is_available() {
                return ItemVerdict::Unavailable {
                    reason: with_messages(form, format!("line availability: {availability}")),
                    price,
                    list_price,
                };
            }

            let option_id = option.map(|sla| sla.external_id().to_owned());
            match (ctx.rule, option) {
                (AvailabilityRule::LineItem, _) => ItemVerdict::Available {
                    price,
                    list_price,
                    quantity: line.quantity,
                    option_id,
                },
                (AvailabilityRule::Strict, Some(sla)) if sla.available != Some(false) => {
                    ItemVerdict::Available {
                        price,
                        list_price,
                        quantity: line.quantity,
                        option_id,
                    }
                }
                (AvailabilityRule::Strict, Some(sla)) => ItemVerdict::Unavailable {
                    reason: with_messages(
                        form,
                        format!("fulfillment option {} unavailable", sla.id),
                    ),
                    price,
                    list_price,
                },
                (AvailabilityRule::Strict, None) => ItemVerdict::Unavailable {
                    reason: with_messages(form, NO_MATCHING_OPTION.to_owned()),
                    price,
                    list_price,
                },
            }
        })
        .collect();

    ParsedSimulation {
        verdicts,
        discovered_option_id,
        currency_code: form.currency_code().map(str::to_owned),
    }
}

fn find_line<'f>(form: &'f OrderForm, item: &TrackedItem) -> Option<(usize, &'f OrderFormItem)> {
    form.items.iter().enumerate().find(|(_, line)| {
        line.id == item.sku_id && (line.seller.is_empty() || line.seller == item.seller_id)
    })
}

fn find_logistics<'f>(form: &'f OrderForm, index: usize, sku_id: &str) -> Option<&'f LogisticsInfo> {
    let logistics = form.logistics();
    logistics
        .iter()
        .find(|l| l.item_index == Some(index))
        .or_else(|| logistics.iter().find(|l| l.item_id.as_deref() == Some(sku_id)))
        .or_else(|| {
            logistics
                .get(index)
                .filter(|l| l.item_index.is_none() && l.item_id.is_none())
        })
}

/// Picks the option the verdict should be based on.
///
/// A known option id must match exactly on the pickup shape. On the
/// delivery shape an unmatched point falls back to discovery (first pickup
/// option, unless the storefront is delivery-only) and then to the first
/// delivery option (unless the storefront is pickup-only).
fn match_option<'s>(
    slas: &'s [Sla],
    known_id: Option<&str>,
    shape: ShippingShape,
    mode: FulfillmentMode,
) -> Option<&'s Sla> {
    if let Some(id) = known_id {
        if let Some(sla) = slas.iter().find(|s| s.matches(id)) {
            return Some(sla);
        }
    }
    if shape == ShippingShape::Pickup {
        return None;
    }
    if known_id.is_none() && mode != FulfillmentMode::Delivery {
        if let Some(sla) = slas.iter().find(|s| s.is_pickup()) {
            return Some(sla);
        }
    }
    if mode == FulfillmentMode::Pickup {
        return None;
    }
    slas.iter().find(|s| !s.is_pickup())
}

fn line_price(line: &OrderFormItem) -> Option<Decimal> {
    line.selling_price.or(line.price).map(minor_to_major)
}

fn missing_line(form: &OrderForm, item: &TrackedItem, raw: &str) -> ItemVerdict {
    ItemVerdict::Unparseable {
        reason: with_messages(
            form,
            format!(
                "line for sku {} seller {} missing from response",
                item.sku_id, item.seller_id
            ),
        ),
        raw: raw.to_owned(),
    }
}

/// Appends the storefront's own messages, if any, to a verdict reason.
fn with_messages(form: &OrderForm, reason: String) -> String {
    match form.message_text() {
        Some(messages) => format!("{reason} (storefront: {messages})"),
        None => reason,
    }
}

#[cfg(test)]
#[path = "parse_test.rs"]
mod tests;
