//! HTTP transport for storefront checkout endpoints.
//!
//! Every request goes through the [`RateGovernor`] and carries the
//! storefront's affinity cookies. Responses are screened for anti-automation
//! interstitials before status handling.

mod challenge;

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, COOKIE, ORIGIN, REFERER};
use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;
use shelfcheck_core::{truncate_diagnostic, Storefront};
use tokio_util::sync::CancellationToken;

use crate::error::ProbeError;
use crate::governor::RateGovernor;
use crate::session::SharedSession;

pub(crate) use challenge::challenge_marker;

/// Builds the shared `reqwest` client used for every storefront.
///
/// # Errors
///
/// Returns [`ProbeError::Http`] if the client cannot be constructed.
pub fn build_http_client(timeout_secs: u64, user_agent: &str) -> Result<Client, ProbeError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(user_agent)
        .build()?;
    Ok(client)
}

pub struct StorefrontClient {
    http: Client,
    governor: Arc<RateGovernor>,
    excerpt_max_bytes: usize,
}

impl StorefrontClient {
    #[must_use]
    pub fn new(http: Client, governor: Arc<RateGovernor>, excerpt_max_bytes: usize) -> Self {
        Self {
            http,
            governor,
            excerpt_max_bytes,
        }
    }

    #[must_use]
    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    /// Issues a GET to `path` under the storefront's lease and affinity.
    ///
    /// # Errors
    ///
    /// See [`StorefrontClient::post_json`].
    pub async fn get(
        &self,
        storefront: &Storefront,
        session: &SharedSession,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ProbeError> {
        let url = resolve_url(storefront, path)?;
        let request = self.http.request(Method::GET, &url);
        self.execute(storefront, session, request, url, cancel).await
    }

    /// Issues a JSON POST to `path` and returns the raw response body.
    ///
    /// # Errors
    ///
    /// - [`ProbeError::Cancelled`] if `cancel` fires while waiting for a lease
    ///   or for the response.
    /// - [`ProbeError::Blocked`] when the response is an anti-automation page.
    /// - [`ProbeError::UnexpectedStatus`] for any other non-2xx status.
    /// - [`ProbeError::Http`] on network or timeout failure.
    pub async fn post_json<B>(
        &self,
        storefront: &Storefront,
        session: &SharedSession,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<String, ProbeError>
    where
        B: Serialize + ?Sized,
    {
        let url = resolve_url(storefront, path)?;
        let request = self.http.request(Method::POST, &url).json(body);
        self.execute(storefront, session, request, url, cancel).await
    }

    async fn execute(
        &self,
        storefront: &Storefront,
        session: &SharedSession,
        request: RequestBuilder,
        url: String,
        cancel: &CancellationToken,
    ) -> Result<String, ProbeError> {
        // Held until the body is read; dropping it on any exit path frees the slots.
        let _lease = self.governor.acquire(&storefront.slug, cancel).await?;

        let cookie_header = {
            let mut ctx = session.lock().await;
            ctx.mark_request();
            ctx.cookie_header()
        };

        let mut request = request
            .header(ACCEPT, "application/json, text/html;q=0.9, */*;q=0.8")
            .header(ORIGIN, storefront.origin())
            .header(REFERER, format!("{}/", storefront.origin()));
        if let Some(cookie) = cookie_header {
            request = request.header(COOKIE, cookie);
        }

        tracing::debug!(storefront = %storefront.slug, url = %url, "storefront request");

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProbeError::Cancelled),
            response = request.send() => response?,
        };

        let status = response.status();
        let headers = response.headers().clone();
        session.lock().await.absorb_set_cookies(&headers);

        let body = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProbeError::Cancelled),
            body = response.text() => body?,
        };

        if let Some(marker) = screen_for_challenge(status.is_success(), &headers, &body) {
            tracing::warn!(
                storefront = %storefront.slug,
                url = %url,
                status = status.as_u16(),
                marker,
                "anti-automation response"
            );
            return Err(ProbeError::Blocked {
                url,
                marker: marker.to_owned(),
                excerpt: truncate_diagnostic(&body, self.excerpt_max_bytes),
            });
        }

        if !status.is_success() {
            return Err(ProbeError::UnexpectedStatus {
                status: status.as_u16(),
                url,
                excerpt: truncate_diagnostic(&body, self.excerpt_max_bytes),
            });
        }

        Ok(body)
    }
}

/// Error responses are always screened. Successful responses are screened
/// only when they are not JSON, since product names in a JSON payload can
/// contain marker words.
fn screen_for_challenge(success: bool, headers: &HeaderMap, body: &str) -> Option<&'static str> {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("json"));
    if success && is_json {
        return None;
    }
    challenge_marker(headers, body)
}

fn resolve_url(storefront: &Storefront, path: &str) -> Result<String, ProbeError> {
    let origin = storefront.origin();
    reqwest::Url::parse(origin).map_err(|e| ProbeError::InvalidStorefrontUrl {
        base_url: storefront.base_url.clone(),
        reason: e.to_string(),
    })?;
    Ok(format!("{origin}{path}"))
}
