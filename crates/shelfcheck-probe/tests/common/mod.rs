//! Fixtures shared by the wiremock integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use shelfcheck_core::{
    AvailabilityRule, FulfillmentMode, FulfillmentPoint, SalesChannel, Storefront, TrackedItem,
};
use shelfcheck_probe::{
    build_http_client, GovernorConfig, ProbeDriver, RateGovernor, RetryPolicy, SessionStore,
    StorefrontClient, SweepConfig,
};

pub const ORDER_FORM: &str = "/api/checkout/pub/orderForm";

pub fn storefront(slug: &str, base_url: &str) -> Storefront {
    Storefront {
        slug: slug.to_owned(),
        base_url: base_url.to_owned(),
        enabled: true,
        sales_channels: vec![channel("1")],
        fulfillment_mode: FulfillmentMode::Auto,
        availability_rule: AvailabilityRule::Strict,
    }
}

pub fn channel(id: &str) -> SalesChannel {
    SalesChannel {
        id: id.to_owned(),
        currency: "BRL".to_owned(),
        locale: "pt-BR".to_owned(),
        country: "BRA".to_owned(),
    }
}

pub fn item(sku: &str) -> TrackedItem {
    TrackedItem {
        sku_id: sku.to_owned(),
        seller_id: "1".to_owned(),
        merchandise_key: format!("789100010{sku}"),
    }
}

pub fn point(key: &str, option_id: Option<&str>, postal_code: Option<&str>) -> FulfillmentPoint {
    FulfillmentPoint {
        key: key.to_owned(),
        postal_code: postal_code.map(str::to_owned),
        geo: None,
        external_option_id: option_id.map(str::to_owned),
    }
}

pub fn governor_config() -> GovernorConfig {
    GovernorConfig {
        global_max_in_flight: 10,
        host_max_in_flight: 4,
        min_interval: Duration::ZERO,
    }
}

pub fn sweep_config() -> SweepConfig {
    SweepConfig {
        governor: governor_config(),
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(10),
        },
        batch_size: 1,
        storefront_cooldown: Duration::ZERO,
        max_concurrent_batches: 10,
        diagnostic_max_bytes: 4096,
    }
}

pub fn http() -> reqwest::Client {
    build_http_client(5, "shelfcheck-test/0.1").expect("failed to build test client")
}

pub fn driver() -> ProbeDriver {
    let governor = Arc::new(RateGovernor::new(governor_config()));
    ProbeDriver::new(
        StorefrontClient::new(http(), governor, 4096),
        Arc::new(SessionStore::new()),
        4096,
    )
}

// -- response bodies --

pub fn line(sku: &str, availability: &str, selling_price: i64) -> Value {
    json!({
        "id": sku,
        "seller": "1",
        "availability": availability,
        "sellingPrice": selling_price,
        "listPrice": selling_price,
        "quantity": 1
    })
}

pub fn pickup_sla(id: &str) -> Value {
    json!({"id": id, "deliveryChannel": "pickup-in-point", "pickupPointId": id})
}

pub fn delivery_sla(id: &str) -> Value {
    json!({"id": id, "deliveryChannel": "delivery"})
}

pub fn form(id: &str, lines: Vec<Value>, slas_per_line: Option<Vec<Value>>) -> Value {
    let mut body = json!({
        "orderFormId": id,
        "items": lines,
        "storePreferencesData": {"currencyCode": "BRL"}
    });
    if let Some(slas) = slas_per_line {
        let count = body["items"].as_array().map_or(0, Vec::len);
        let logistics: Vec<Value> = (0..count)
            .map(|i| json!({"itemIndex": i, "slas": slas.clone()}))
            .collect();
        body["shippingData"] = json!({"logisticsInfo": logistics});
    }
    body
}

/// Mounts create-session, add-items and attach-fulfillment handlers for
/// cart `of-1`.
pub async fn mount_checkout(server: &MockServer, staged: Value, simulated: Value) {
    Mock::given(method("POST"))
        .and(path(ORDER_FORM))
        .and(query_param("sc", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "checkout.vtex.com=__ofid=of-1; Path=/")
                .set_body_json(form("of-1", Vec::new(), None)),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("{ORDER_FORM}/of-1/items")))
        .respond_with(ResponseTemplate::new(200).set_body_json(staged))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("{ORDER_FORM}/of-1/attachments/shippingData")))
        .respond_with(ResponseTemplate::new(200).set_body_json(simulated))
        .mount(server)
        .await;
}

/// Replies with each template in turn, repeating the last one, and records
/// when every request arrived.
pub struct Sequence {
    responses: Vec<ResponseTemplate>,
    calls: AtomicUsize,
    arrivals: Arc<Mutex<Vec<Instant>>>,
}

impl Sequence {
    pub fn new(responses: Vec<ResponseTemplate>) -> (Self, Arc<Mutex<Vec<Instant>>>) {
        let arrivals = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                responses,
                calls: AtomicUsize::new(0),
                arrivals: Arc::clone(&arrivals),
            },
            arrivals,
        )
    }
}

impl Respond for Sequence {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.arrivals.lock().unwrap().push(Instant::now());
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let index = n.min(self.responses.len() - 1);
        self.responses[index].clone()
    }
}

/// Requests received at `path` (any method).
pub async fn requests_to(server: &MockServer, wanted: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == wanted)
        .collect()
}
