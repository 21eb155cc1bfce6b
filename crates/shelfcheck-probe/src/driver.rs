//! Probe protocol driver: the order-simulation state machine.
//!
//! ```text
//! INIT -> SESSION_OBTAINED -> ITEM_STAGED -> FULFILLMENT_SIMULATED -> PARSED
//!    \-> FAILED (any state, on an unrecoverable response)
//! ```
//!
//! One run stages N items (N = 1 for a single probe) in one cart and
//! simulates fulfillment once for all of them.

use std::sync::Arc;

use shelfcheck_core::{
    truncate_diagnostic, FulfillmentMode, FulfillmentPoint, SalesChannel, Storefront, TrackedItem,
};
use tokio_util::sync::CancellationToken;

use crate::client::StorefrontClient;
use crate::error::ProbeError;
use crate::parse::{parse_simulation, staged_verdicts, ItemVerdict, ParseContext, ShippingShape};
use crate::session::{bind_sales_channel, SessionStore, SharedSession};
use crate::types::{
    AddItemsRequest, AddressPayload, CreateSessionRequest, LogisticsSelection, OrderForm,
    OrderItemPayload, ShippingAttachment, PICKUP_CHANNEL,
};

const ORDER_FORM_PATH: &str = "/api/checkout/pub/orderForm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStage {
    Init,
    SessionObtained,
    ItemStaged,
    FulfillmentSimulated,
    Parsed,
}

impl std::fmt::Display for ProbeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProbeStage::Init => "init",
            ProbeStage::SessionObtained => "session_obtained",
            ProbeStage::ItemStaged => "item_staged",
            ProbeStage::FulfillmentSimulated => "fulfillment_simulated",
            ProbeStage::Parsed => "parsed",
        };
        f.write_str(name)
    }
}

/// Items to check against one fulfillment point under one sales channel.
#[derive(Debug, Clone, Copy)]
pub struct ProbeRequest<'a> {
    pub storefront: &'a Storefront,
    pub point: &'a FulfillmentPoint,
    pub items: &'a [TrackedItem],
    pub channel: &'a SalesChannel,
}

#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// One verdict per requested item, same order.
    pub verdicts: Vec<ItemVerdict>,
    /// Option id the caller should record for the point.
    pub discovered_option_id: Option<String>,
    /// Shape whose simulation was parsed; `None` when staging alone decided.
    pub shape: Option<ShippingShape>,
    pub currency_code: String,
}

pub struct ProbeDriver {
    client: StorefrontClient,
    sessions: Arc<SessionStore>,
    diagnostic_max_bytes: usize,
}

impl ProbeDriver {
    #[must_use]
    pub fn new(
        client: StorefrontClient,
        sessions: Arc<SessionStore>,
        diagnostic_max_bytes: usize,
    ) -> Self {
        Self {
            client,
            sessions,
            diagnostic_max_bytes,
        }
    }

    #[must_use]
    pub fn client(&self) -> &StorefrontClient {
        &self.client
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Runs the protocol once for every item in `request`.
    ///
    /// # Errors
    ///
    /// Returns the [`ProbeError`] of the first unrecoverable step. A 5xx on
    /// one shipping shape advances to the next candidate shape and only
    /// surfaces if it was the last one.
    pub async fn probe(
        &self,
        request: &ProbeRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ProbeReport, ProbeError> {
        let ProbeRequest {
            storefront,
            point,
            items,
            channel,
        } = *request;
        let shapes = candidate_shapes(storefront.fulfillment_mode, point)?;
        let session = self.sessions.get_or_create(storefront);
        bind_sales_channel(&mut *session.lock().await, channel);

        let sc = &channel.id;
        let mut stage = ProbeStage::Init;
        tracing::debug!(
            storefront = %storefront.slug,
            point = %point.key,
            items = items.len(),
            channel = %sc,
            %stage,
            "probe started"
        );

        // INIT -> SESSION_OBTAINED
        let body = self
            .client
            .post_json(
                storefront,
                &session,
                &format!("{ORDER_FORM_PATH}?sc={sc}"),
                &CreateSessionRequest::default(),
                cancel,
            )
            .await?;
        let order_form_id = self
            .decode("create session", &body)?
            .order_form_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProbeError::UnexpectedShape {
                context: "create session".to_owned(),
                reason: "response has no orderFormId".to_owned(),
            })?;
        stage = ProbeStage::SessionObtained;
        tracing::debug!(storefront = %storefront.slug, order_form_id = %order_form_id, %stage, "cart created");

        // SESSION_OBTAINED -> ITEM_STAGED
        let add_items = AddItemsRequest {
            order_items: items
                .iter()
                .map(|item| OrderItemPayload {
                    id: item.sku_id.clone(),
                    quantity: 1,
                    seller: item.seller_id.clone(),
                })
                .collect(),
        };
        let body = self
            .client
            .post_json(
                storefront,
                &session,
                &format!("{ORDER_FORM_PATH}/{order_form_id}/items?sc={sc}"),
                &add_items,
                cancel,
            )
            .await?;
        let staged_form = self.decode("add items", &body)?;
        let staged = staged_verdicts(&staged_form, items, &self.excerpt(&body));
        stage = ProbeStage::ItemStaged;

        if staged.iter().all(Option::is_some) {
            tracing::debug!(storefront = %storefront.slug, %stage, "staging decided every item");
            return Ok(ProbeReport {
                verdicts: staged.into_iter().flatten().collect(),
                discovered_option_id: None,
                shape: None,
                currency_code: currency(staged_form.currency_code(), channel),
            });
        }

        let pending: Vec<TrackedItem> = items
            .iter()
            .zip(&staged)
            .filter(|(_, verdict)| verdict.is_none())
            .map(|(item, _)| item.clone())
            .collect();

        // ITEM_STAGED -> FULFILLMENT_SIMULATED
        let (shape, form, body) = self
            .simulate(
                &session,
                &order_form_id,
                request,
                &shapes,
                staged_form.items.len(),
                cancel,
            )
            .await?;
        stage = ProbeStage::FulfillmentSimulated;
        tracing::debug!(storefront = %storefront.slug, %shape, %stage, "fulfillment simulated");

        // FULFILLMENT_SIMULATED -> PARSED
        let ctx = ParseContext {
            items: &pending,
            point,
            shape,
            mode: storefront.fulfillment_mode,
            rule: storefront.availability_rule,
        };
        let parsed = parse_simulation(&form, &ctx, &self.excerpt(&body));
        let mut simulated = parsed.verdicts.into_iter();
        let verdicts = staged
            .into_iter()
            .map(|decided| {
                decided.or_else(|| simulated.next()).unwrap_or_else(|| {
                    ItemVerdict::Unparseable {
                        reason: "simulation returned fewer verdicts than items".to_owned(),
                        raw: String::new(),
                    }
                })
            })
            .collect();
        stage = ProbeStage::Parsed;
        tracing::debug!(storefront = %storefront.slug, point = %point.key, %stage, "probe parsed");

        Ok(ProbeReport {
            verdicts,
            discovered_option_id: parsed.discovered_option_id,
            shape: Some(shape),
            currency_code: parsed
                .currency_code
                .unwrap_or_else(|| currency(staged_form.currency_code(), channel)),
        })
    }

    /// Attaches fulfillment data, trying each shape once in order.
    async fn simulate(
        &self,
        session: &SharedSession,
        order_form_id: &str,
        request: &ProbeRequest<'_>,
        shapes: &[ShippingShape],
        line_count: usize,
        cancel: &CancellationToken,
    ) -> Result<(ShippingShape, OrderForm, String), ProbeError> {
        let storefront = request.storefront;
        let sc = &request.channel.id;
        let mut last_err = None;

        for (i, &shape) in shapes.iter().enumerate() {
            let attachment = shipping_attachment(shape, request.point, request.channel, line_count);
            let result = self
                .client
                .post_json(
                    storefront,
                    session,
                    &format!("{ORDER_FORM_PATH}/{order_form_id}/attachments/shippingData?sc={sc}"),
                    &attachment,
                    cancel,
                )
                .await;

            let body = match result {
                Ok(body) => body,
                Err(e) if e.is_server_error() && i + 1 < shapes.len() => {
                    tracing::warn!(
                        storefront = %storefront.slug,
                        point = %request.point.key,
                        %shape,
                        error = %e,
                        "shipping shape rejected; trying next shape"
                    );
                    last_err = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let form = self.decode("attach fulfillment", &body)?;
            if !form.logistics().is_empty() {
                return Ok((shape, form, body));
            }

            // Some storefronts answer the attachment with a trimmed form.
            let body = self
                .client
                .get(
                    storefront,
                    session,
                    &format!("{ORDER_FORM_PATH}/{order_form_id}?sc={sc}"),
                    cancel,
                )
                .await?;
            let form = self.decode("session state", &body)?;
            return Ok((shape, form, body));
        }

        Err(last_err.unwrap_or_else(|| ProbeError::UnprobeablePoint {
            point: request.point.key.clone(),
        }))
    }

    fn decode(&self, context: &str, body: &str) -> Result<OrderForm, ProbeError> {
        serde_json::from_str(body).map_err(|source| ProbeError::Deserialize {
            context: context.to_owned(),
            excerpt: self.excerpt(body),
            source,
        })
    }

    fn excerpt(&self, body: &str) -> String {
        truncate_diagnostic(body, self.diagnostic_max_bytes)
    }
}

/// Shipping shapes to try for `point`, in preference order.
///
/// # Errors
///
/// Returns [`ProbeError::UnprobeablePoint`] when the point offers nothing the
/// configured mode can use.
pub fn candidate_shapes(
    mode: FulfillmentMode,
    point: &FulfillmentPoint,
) -> Result<Vec<ShippingShape>, ProbeError> {
    let has_location = point.postal_code.is_some() || point.geo.is_some();
    let known = point.external_option_id.is_some();

    let shapes = match mode {
        FulfillmentMode::Delivery if has_location => vec![ShippingShape::Delivery],
        FulfillmentMode::Pickup if known => vec![ShippingShape::Pickup],
        FulfillmentMode::Auto if known && has_location => {
            vec![ShippingShape::Pickup, ShippingShape::Delivery]
        }
        FulfillmentMode::Auto if known => vec![ShippingShape::Pickup],
        FulfillmentMode::Pickup | FulfillmentMode::Auto if has_location => {
            vec![ShippingShape::Delivery]
        }
        _ => Vec::new(),
    };

    if shapes.is_empty() {
        return Err(ProbeError::UnprobeablePoint {
            point: point.key.clone(),
        });
    }
    Ok(shapes)
}

fn shipping_attachment(
    shape: ShippingShape,
    point: &FulfillmentPoint,
    channel: &SalesChannel,
    line_count: usize,
) -> ShippingAttachment {
    let has_location = point.postal_code.is_some() || point.geo.is_some();
    let address = |address_type| AddressPayload {
        address_type,
        country: channel.country.clone(),
        postal_code: point.postal_code.clone(),
        geo_coordinates: point.geo.map(|g| [g.lon, g.lat]),
    };

    match (shape, point.external_option_id.as_deref()) {
        (ShippingShape::Pickup, Some(option_id)) => ShippingAttachment {
            clear_address_if_postal_code_not_found: false,
            selected_addresses: if has_location {
                vec![address("search")]
            } else {
                Vec::new()
            },
            logistics_info: (0..line_count)
                .map(|item_index| LogisticsSelection {
                    item_index,
                    selected_delivery_channel: PICKUP_CHANNEL,
                    selected_sla: option_id.to_owned(),
                })
                .collect(),
        },
        _ => ShippingAttachment {
            clear_address_if_postal_code_not_found: false,
            selected_addresses: vec![address("residential")],
            logistics_info: Vec::new(),
        },
    }
}

fn currency(reported: Option<&str>, channel: &SalesChannel) -> String {
    reported.unwrap_or(&channel.currency).to_owned()
}
