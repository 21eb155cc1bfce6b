//! Per-storefront affinity state: cookie jar, bound sales channel, and
//! last-request timestamp.
//!
//! The jar is a `reqwest` [`Jar`], so `Set-Cookie` expiry (`Max-Age` and
//! `Expires`), path and host scoping follow the cookie store's rules.
//!
//! Contexts live for one sweep. [`SessionStore`] creates them lazily and
//! hands out shared handles; callers hold the inner lock only long enough to
//! read or fold cookies, never across a network call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine as _;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::Url;
use serde::Serialize;
use shelfcheck_core::{SalesChannel, Storefront};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::StorefrontClient;
use crate::error::ProbeError;

/// Cookie carrying the encoded channel/region record.
pub const SEGMENT_COOKIE: &str = "vtex_segment";
const LOCALE_COOKIE: &str = "locale";
const VISITOR_COOKIE: &str = "anonymous_visitor_id";

/// Low-risk requests issued once per storefront before probing.
pub const WARMUP_STEPS: [(&str, &str); 3] = [
    ("home", "/"),
    ("session", "/api/sessions?items=*"),
    ("empty_cart", "/api/checkout/pub/orderForm"),
];

pub type SharedSession = Arc<tokio::sync::Mutex<SessionContext>>;

#[derive(Debug, Clone)]
pub struct SessionContext {
    jar: Arc<Jar>,
    /// `None` when the base URL does not parse; such a storefront never
    /// reaches the network, so the jar stays unused.
    origin: Option<Url>,
    bound_channel: Option<String>,
    last_request_at: Option<Instant>,
}

/// Channel record encoded into [`SEGMENT_COOKIE`].
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SegmentRecord<'a> {
    channel: &'a str,
    currency_code: &'a str,
    culture_info: &'a str,
    country_code: &'a str,
}

impl SessionContext {
    /// Default affinity for a storefront never contacted in this run.
    #[must_use]
    pub fn with_defaults(storefront: &Storefront) -> Self {
        let mut ctx = Self {
            jar: Arc::new(Jar::default()),
            origin: Url::parse(storefront.origin()).ok(),
            bound_channel: None,
            last_request_at: None,
        };
        if let Some(channel) = storefront.sales_channels.first() {
            ctx.set_cookie(LOCALE_COOKIE, &channel.locale);
        }
        ctx.set_cookie(VISITOR_COOKIE, &anonymous_visitor_id());
        ctx
    }

    /// Value for the `Cookie` request header, or `None` when the jar holds
    /// nothing for the storefront's origin.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        let origin = self.origin.as_ref()?;
        let header = self.jar.cookies(origin)?;
        header.to_str().ok().map(str::to_owned)
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookie_header()?.split("; ").find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name).then(|| value.to_owned())
        })
    }

    fn set_cookie(&mut self, name: &str, value: &str) {
        if let Some(origin) = &self.origin {
            self.jar
                .add_cookie_str(&format!("{name}={value}; Path=/"), origin);
        }
    }

    #[must_use]
    pub fn bound_channel(&self) -> Option<&str> {
        self.bound_channel.as_deref()
    }

    #[must_use]
    pub fn last_request_at(&self) -> Option<Instant> {
        self.last_request_at
    }

    pub fn mark_request(&mut self) {
        self.last_request_at = Some(Instant::now());
    }

    /// Folds every `Set-Cookie` header into the jar; expired cookies are
    /// removed. Returns whether the outgoing `Cookie` header changed.
    pub fn absorb_set_cookies(&mut self, headers: &HeaderMap) -> bool {
        let Some(origin) = &self.origin else {
            return false;
        };
        let mut set_cookies = headers.get_all(SET_COOKIE).iter().peekable();
        if set_cookies.peek().is_none() {
            return false;
        }
        let before = self.cookie_header();
        self.jar.set_cookies(&mut set_cookies, origin);
        self.cookie_header() != before
    }
}

/// Re-derives the channel affinity token and replaces it in `ctx`.
///
/// Returns `false` when `ctx` was already bound to the same channel with the
/// same token, in which case nothing changes.
pub fn bind_sales_channel(ctx: &mut SessionContext, channel: &SalesChannel) -> bool {
    let token = segment_token(channel);
    let unchanged = ctx.bound_channel.as_deref() == Some(channel.id.as_str())
        && ctx.cookie(SEGMENT_COOKIE).as_deref() == Some(token.as_str());
    if unchanged {
        return false;
    }
    ctx.set_cookie(SEGMENT_COOKIE, &token);
    ctx.set_cookie(LOCALE_COOKIE, &channel.locale);
    ctx.bound_channel = Some(channel.id.clone());
    true
}

/// Base64 of the JSON channel record. Deterministic for a given channel.
#[must_use]
pub fn segment_token(channel: &SalesChannel) -> String {
    let record = SegmentRecord {
        channel: &channel.id,
        currency_code: &channel.currency,
        culture_info: &channel.locale,
        country_code: &channel.country,
    };
    // Serializing a struct of string slices cannot fail.
    let json = serde_json::to_vec(&record).unwrap_or_default();
    base64::engine::general_purpose::STANDARD.encode(json)
}

/// Outcome of the warmup sequence. Warmup never fails a sweep; this only
/// reports how much affinity was established.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmupReport {
    pub succeeded: usize,
    /// `(step, error)` for every step that failed.
    pub failed: Vec<(String, String)>,
    pub cancelled: bool,
}

impl WarmupReport {
    #[must_use]
    pub fn fully_failed(&self) -> bool {
        self.succeeded == 0 && !self.failed.is_empty()
    }
}

#[derive(Default)]
pub struct SessionStore {
    contexts: Mutex<HashMap<String, SharedSession>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the storefront's context, creating it with default affinity
    /// on first use. Never touches the network.
    pub fn get_or_create(&self, storefront: &Storefront) -> SharedSession {
        let mut contexts = self
            .contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let ctx = contexts.entry(storefront.slug.clone()).or_insert_with(|| {
            Arc::new(tokio::sync::Mutex::new(SessionContext::with_defaults(
                storefront,
            )))
        });
        Arc::clone(ctx)
    }

    /// Issues the warmup GETs through `client`, folding returned cookies into
    /// the storefront's context. Individual step failures are logged and
    /// skipped.
    pub async fn warmup(
        &self,
        client: &StorefrontClient,
        storefront: &Storefront,
        cancel: &CancellationToken,
    ) -> WarmupReport {
        let session = self.get_or_create(storefront);
        let mut report = WarmupReport::default();

        for (step, path) in WARMUP_STEPS {
            match client.get(storefront, &session, path, cancel).await {
                Ok(_) => {
                    tracing::debug!(storefront = %storefront.slug, step, "warmup step ok");
                    report.succeeded += 1;
                }
                Err(ProbeError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        storefront = %storefront.slug,
                        step,
                        error = %e,
                        "warmup step failed; continuing with default affinity"
                    );
                    report.failed.push((step.to_owned(), e.to_string()));
                }
            }
        }

        report
    }
}

fn anonymous_visitor_id() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn storefront() -> Storefront {
        Storefront {
            slug: "mercado-norte".to_owned(),
            base_url: "https://mercadonorte.example".to_owned(),
            enabled: true,
            sales_channels: vec![channel("1"), channel("2")],
            fulfillment_mode: shelfcheck_core::FulfillmentMode::Auto,
            availability_rule: shelfcheck_core::AvailabilityRule::Strict,
        }
    }

    fn channel(id: &str) -> SalesChannel {
        SalesChannel {
            id: id.to_owned(),
            currency: "BRL".to_owned(),
            locale: "pt-BR".to_owned(),
            country: "BRA".to_owned(),
        }
    }

    #[test]
    fn defaults_include_locale_and_visitor_marker() {
        let ctx = SessionContext::with_defaults(&storefront());
        assert_eq!(ctx.cookie(LOCALE_COOKIE).as_deref(), Some("pt-BR"));
        assert_eq!(ctx.cookie(VISITOR_COOKIE).map(|v| v.len()), Some(32));
        assert!(ctx.bound_channel().is_none());
    }

    #[test]
    fn segment_token_decodes_to_channel_record() {
        let token = segment_token(&channel("3"));
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(token)
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value["channel"], "3");
        assert_eq!(value["currencyCode"], "BRL");
        assert_eq!(value["cultureInfo"], "pt-BR");
        assert_eq!(value["countryCode"], "BRA");
    }

    #[test]
    fn binding_same_channel_twice_is_a_no_op() {
        let mut ctx = SessionContext::with_defaults(&storefront());
        assert!(bind_sales_channel(&mut ctx, &channel("1")));
        let header_after_first = ctx.cookie_header();
        assert!(!bind_sales_channel(&mut ctx, &channel("1")));
        assert_eq!(ctx.cookie_header(), header_after_first);
        assert_eq!(ctx.bound_channel(), Some("1"));
    }

    #[test]
    fn binding_other_channel_replaces_token() {
        let mut ctx = SessionContext::with_defaults(&storefront());
        bind_sales_channel(&mut ctx, &channel("1"));
        let first = ctx.cookie(SEGMENT_COOKIE);
        assert!(bind_sales_channel(&mut ctx, &channel("2")));
        assert_ne!(ctx.cookie(SEGMENT_COOKIE), first);
        assert_eq!(ctx.bound_channel(), Some("2"));
    }

    #[test]
    fn absorbs_and_expires_cookies() {
        let mut ctx = SessionContext::with_defaults(&storefront());
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("vtex_session=abc123; Path=/; HttpOnly"),
        );
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("checkout.vtex.com=__ofid=f00; Path=/"),
        );
        assert!(ctx.absorb_set_cookies(&headers));
        assert_eq!(ctx.cookie("vtex_session").as_deref(), Some("abc123"));
        assert_eq!(ctx.cookie("checkout.vtex.com").as_deref(), Some("__ofid=f00"));

        let mut expire = HeaderMap::new();
        expire.append(
            SET_COOKIE,
            HeaderValue::from_static("vtex_session=gone; Path=/; Max-Age=0"),
        );
        assert!(ctx.absorb_set_cookies(&expire));
        assert!(ctx.cookie("vtex_session").is_none());
    }

    #[test]
    fn past_expires_date_deletes_cookie() {
        let mut ctx = SessionContext::with_defaults(&storefront());
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("vtex_session=abc; Path=/"),
        );
        ctx.absorb_set_cookies(&headers);
        assert_eq!(ctx.cookie("vtex_session").as_deref(), Some("abc"));

        let mut clear = HeaderMap::new();
        clear.append(
            SET_COOKIE,
            HeaderValue::from_static(
                "vtex_session=deleted; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
            ),
        );
        assert!(ctx.absorb_set_cookies(&clear));
        let header = ctx.cookie_header().unwrap();
        assert!(!header.contains("vtex_session"), "cookie: {header}");
        assert!(header.contains("anonymous_visitor_id="));
    }

    #[test]
    fn unchanged_set_cookie_reports_no_change() {
        let mut ctx = SessionContext::with_defaults(&storefront());
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("vtex_session=abc; Path=/"));
        assert!(ctx.absorb_set_cookies(&headers));
        assert!(!ctx.absorb_set_cookies(&headers));
        assert!(!ctx.absorb_set_cookies(&HeaderMap::new()));
    }

    #[test]
    fn cookie_header_joins_pairs() {
        let mut ctx = SessionContext::with_defaults(&storefront());
        bind_sales_channel(&mut ctx, &channel("1"));
        let header = ctx.cookie_header().unwrap();
        assert!(header.contains("locale=pt-BR"));
        assert!(header.contains("vtex_segment="));
        assert!(header.contains("; "));
    }

    #[test]
    fn store_returns_same_context_per_storefront() {
        let store = SessionStore::new();
        let sf = storefront();
        let a = store.get_or_create(&sf);
        let b = store.get_or_create(&sf);
        assert!(Arc::ptr_eq(&a, &b));

        let mut other = storefront();
        other.slug = "farmacia-sul".to_owned();
        let c = store.get_or_create(&other);
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
