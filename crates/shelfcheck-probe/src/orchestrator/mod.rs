//! Probe orchestrator: drives a full sweep across storefronts.
//!
//! Storefronts are swept one after another with a cooldown between them.
//! Within a storefront, tasks for each sales channel are grouped into
//! batches (one fulfillment point, up to `batch_size` items) and run on a
//! bounded worker pool; the [`RateGovernor`] bounds the actual requests.
//! Task failures stop at the task and storefront failures stop at the
//! storefront. Only cancellation ends the sweep early.

mod record;
mod summary;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use shelfcheck_core::{
    AppConfig, FulfillmentPoint, ProbeResult, ProbeTask, SalesChannel, Storefront, TrackedItem,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, CatalogError};
use crate::client::StorefrontClient;
use crate::driver::{ProbeDriver, ProbeRequest};
use crate::error::FailureClass;
use crate::governor::{GovernorConfig, RateGovernor};
use crate::retry::{run_with_retry, RetryPolicy};
use crate::session::{bind_sales_channel, SessionStore};
use crate::sink::ResultSink;

pub use summary::{RunSummary, StorefrontSummary};
use summary::Tally;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("no enabled storefronts match {filter}")]
    NoStorefronts { filter: String },

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("storefront '{0}' is not configured or not enabled")]
    UnknownStorefront(String),

    #[error("storefront '{storefront}' has no sales channel '{channel}'")]
    UnknownChannel { storefront: String, channel: String },

    #[error("probe cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    pub governor: GovernorConfig,
    pub retry: RetryPolicy,
    /// Items staged per cart. `1` probes each item on its own.
    pub batch_size: usize,
    /// Pause between storefronts.
    pub storefront_cooldown: Duration,
    /// Batches in progress at once within a storefront.
    pub max_concurrent_batches: usize,
    pub diagnostic_max_bytes: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        let governor = GovernorConfig::default();
        Self {
            governor,
            retry: RetryPolicy::default(),
            batch_size: 1,
            storefront_cooldown: Duration::from_secs(5),
            max_concurrent_batches: governor.global_max_in_flight,
            diagnostic_max_bytes: 4096,
        }
    }
}

impl SweepConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            governor: GovernorConfig {
                global_max_in_flight: config.global_max_in_flight,
                host_max_in_flight: config.host_max_in_flight,
                min_interval: Duration::from_millis(config.min_request_interval_ms),
            },
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                backoff_base: Duration::from_millis(config.retry_backoff_base_ms),
            },
            batch_size: config.batch_size,
            storefront_cooldown: Duration::from_millis(config.storefront_cooldown_ms),
            max_concurrent_batches: config.global_max_in_flight,
            diagnostic_max_bytes: config.diagnostic_max_bytes,
        }
    }
}

/// Outcome of [`Orchestrator::probe_once`].
#[derive(Debug, Clone)]
pub struct SingleProbe {
    pub result: ProbeResult,
    pub attempts: u32,
    pub discovered_option_id: Option<String>,
}

/// One fulfillment point and the items staged together against it.
struct Batch {
    point: FulfillmentPoint,
    items: Vec<TrackedItem>,
}

#[derive(Default)]
struct BatchOutcome {
    tally: Tally,
    rows: Vec<ProbeResult>,
    attempts: u32,
    discovered: Option<(String, String)>,
    cancelled: bool,
}

pub struct Orchestrator<C, S> {
    catalog: Arc<C>,
    sink: Arc<S>,
    http: reqwest::Client,
    config: SweepConfig,
}

impl<C, S> Orchestrator<C, S>
where
    C: Catalog,
    S: ResultSink,
{
    #[must_use]
    pub fn new(catalog: Arc<C>, sink: Arc<S>, http: reqwest::Client, config: SweepConfig) -> Self {
        Self {
            catalog,
            sink,
            http,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Probes every enabled storefront (or only `filter`) and returns the
    /// run's totals.
    ///
    /// # Errors
    ///
    /// Fails only before any network activity: when no enabled storefront
    /// matches or the storefront list cannot be loaded.
    pub async fn run_sweep(
        &self,
        filter: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, SweepError> {
        let storefronts = self.catalog.enabled_storefronts(filter).await?;
        if storefronts.is_empty() {
            return Err(SweepError::NoStorefronts {
                filter: filter.map_or_else(|| "any filter".to_owned(), |f| format!("'{f}'")),
            });
        }

        let driver = self.new_driver();
        let mut summary = RunSummary::default();
        let mut interrupted = false;
        tracing::info!(storefronts = storefronts.len(), "probe sweep started");

        for (i, storefront) in storefronts.iter().enumerate() {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }
            if i > 0 && !self.config.storefront_cooldown.is_zero() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        interrupted = true;
                        break;
                    }
                    () = tokio::time::sleep(self.config.storefront_cooldown) => {}
                }
            }

            let result = self.sweep_storefront(&driver, storefront, cancel).await;
            if let Some(error) = &result.error {
                tracing::error!(storefront = %storefront.slug, error = %error, "storefront sweep failed");
            } else {
                tracing::info!(
                    storefront = %storefront.slug,
                    checks = result.checks,
                    available = result.available,
                    failed = result.failed,
                    blocked = result.blocked,
                    "storefront sweep complete"
                );
            }
            interrupted |= result.cancelled;
            summary.record(result);
        }

        // A cancel that lands after the last task finished leaves the sweep complete.
        summary.cancelled = interrupted;
        summary.peak_in_flight = driver.client().governor().peak_in_flight();
        tracing::info!(
            storefronts = summary.total_storefronts,
            checks = summary.total_checks,
            available = summary.total_available,
            failed = summary.total_failed,
            cancelled = summary.cancelled,
            "probe sweep finished"
        );
        Ok(summary)
    }

    /// Probes one item at one point outside a sweep and persists the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::UnknownStorefront`] or
    /// [`SweepError::UnknownChannel`] for bad arguments, and
    /// [`SweepError::Cancelled`] if cancelled before an outcome was reached.
    pub async fn probe_once(
        &self,
        storefront_slug: &str,
        point: FulfillmentPoint,
        item: TrackedItem,
        channel_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SingleProbe, SweepError> {
        let storefront = self
            .catalog
            .enabled_storefronts(Some(storefront_slug))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SweepError::UnknownStorefront(storefront_slug.to_owned()))?;
        let channel = match channel_id {
            Some(id) => storefront.channel(id).cloned(),
            None => storefront.sales_channels.first().cloned(),
        }
        .ok_or_else(|| SweepError::UnknownChannel {
            storefront: storefront.slug.clone(),
            channel: channel_id.unwrap_or_default().to_owned(),
        })?;

        let driver = self.new_driver();
        driver
            .sessions()
            .warmup(driver.client(), &storefront, cancel)
            .await;
        bind_sales_channel(
            &mut *driver.sessions().get_or_create(&storefront).lock().await,
            &channel,
        );

        let batch = Batch {
            point,
            items: vec![item],
        };
        let point_key = batch.point.key.clone();
        let mut outcome = self
            .run_batch(&driver, &storefront, &channel, batch, cancel)
            .await;
        if let Some((_, option_id)) = &outcome.discovered {
            self.report_discovery(&storefront.slug, &point_key, option_id)
                .await;
        }

        match outcome.rows.pop() {
            Some(result) if !outcome.cancelled => Ok(SingleProbe {
                result,
                attempts: outcome.attempts,
                discovered_option_id: outcome.discovered.map(|(_, id)| id),
            }),
            _ => Err(SweepError::Cancelled),
        }
    }

    /// Fresh per-run state: governor counters, session contexts, and the
    /// driver over them. Nothing survives into the next run.
    fn new_driver(&self) -> ProbeDriver {
        let governor = Arc::new(RateGovernor::new(self.config.governor));
        let client = StorefrontClient::new(
            self.http.clone(),
            governor,
            self.config.diagnostic_max_bytes,
        );
        ProbeDriver::new(
            client,
            Arc::new(SessionStore::new()),
            self.config.diagnostic_max_bytes,
        )
    }

    async fn sweep_storefront(
        &self,
        driver: &ProbeDriver,
        storefront: &Storefront,
        cancel: &CancellationToken,
    ) -> StorefrontSummary {
        let mut summary = StorefrontSummary::new(&storefront.slug);

        summary.warmup = driver
            .sessions()
            .warmup(driver.client(), storefront, cancel)
            .await;
        if summary.warmup.fully_failed() {
            tracing::warn!(
                storefront = %storefront.slug,
                "warmup failed entirely; probing with default affinity"
            );
        }
        if summary.warmup.cancelled {
            summary.cancelled = true;
            return summary;
        }

        let (items, mut points) = match self.load_tasks(&storefront.slug).await {
            Ok(loaded) => loaded,
            Err(e) => {
                summary.error = Some(e.to_string());
                return summary;
            }
        };
        if items.is_empty() || points.is_empty() {
            tracing::info!(
                storefront = %storefront.slug,
                items = items.len(),
                points = points.len(),
                "nothing to probe"
            );
            return summary;
        }

        let session = driver.sessions().get_or_create(storefront);
        let batch_size = self.config.batch_size.max(1);
        let pool_size = self.config.max_concurrent_batches.max(1);

        for channel in &storefront.sales_channels {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            bind_sales_channel(&mut *session.lock().await, channel);

            let batches: Vec<Batch> = points
                .iter()
                .flat_map(|point| {
                    items.chunks(batch_size).map(move |chunk| Batch {
                        point: point.clone(),
                        items: chunk.to_vec(),
                    })
                })
                .collect();
            tracing::debug!(
                storefront = %storefront.slug,
                channel = %channel.id,
                batches = batches.len(),
                "dispatching batches"
            );

            let mut discovered: HashMap<String, String> = HashMap::new();
            let mut outcomes = stream::iter(batches)
                .map(|batch| self.run_batch(driver, storefront, channel, batch, cancel))
                .buffer_unordered(pool_size);
            while let Some(outcome) = outcomes.next().await {
                summary.cancelled |= outcome.cancelled;
                summary.absorb(&outcome.tally);
                if let Some((point_key, option_id)) = outcome.discovered {
                    discovered.entry(point_key).or_insert(option_id);
                }
            }

            for (point_key, option_id) in discovered {
                self.report_discovery(&storefront.slug, &point_key, &option_id)
                    .await;
                summary.discovered_options += 1;
                if let Some(point) = points.iter_mut().find(|p| p.key == point_key) {
                    point.external_option_id = Some(option_id);
                }
            }
        }

        summary
    }

    async fn load_tasks(
        &self,
        slug: &str,
    ) -> Result<(Vec<TrackedItem>, Vec<FulfillmentPoint>), CatalogError> {
        let keys = self.catalog.tracked_items().await?;
        let items = self.catalog.resolve_items(slug, &keys).await?;
        let points = self.catalog.fulfillment_points(slug).await?;
        Ok((items, points))
    }

    /// Runs one batch under the retry policy and persists one row per item.
    async fn run_batch(
        &self,
        driver: &ProbeDriver,
        storefront: &Storefront,
        channel: &SalesChannel,
        batch: Batch,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        if cancel.is_cancelled() {
            return BatchOutcome {
                cancelled: true,
                ..BatchOutcome::default()
            };
        }

        let request = ProbeRequest {
            storefront,
            point: &batch.point,
            items: &batch.items,
            channel,
        };
        let request = &request;
        let retried = run_with_retry(self.config.retry, cancel, move |attempt| {
            tracing::debug!(
                storefront = %storefront.slug,
                point = %request.point.key,
                attempt,
                "probe attempt"
            );
            driver.probe(request, cancel)
        })
        .await;

        let captured_at = Utc::now();
        let tasks: Vec<ProbeTask> = batch
            .items
            .iter()
            .map(|item| ProbeTask {
                storefront: storefront.slug.clone(),
                point: batch.point.clone(),
                item: item.clone(),
                channel: channel.clone(),
            })
            .collect();
        let mut outcome = BatchOutcome {
            attempts: retried.attempts,
            ..BatchOutcome::default()
        };

        match retried.result {
            Ok(report) => {
                if let Some(option_id) = report.discovered_option_id {
                    outcome.discovered = Some((batch.point.key.clone(), option_id));
                }
                for (task, verdict) in tasks.iter().zip(&report.verdicts) {
                    let row = record::from_verdict(
                        task,
                        verdict,
                        &report.currency_code,
                        captured_at,
                        self.config.diagnostic_max_bytes,
                    );
                    if row.available {
                        outcome.tally.available += 1;
                    }
                    if row.error_class.is_some() {
                        outcome.tally.partial += 1;
                    }
                    self.persist(row, &mut outcome).await;
                }
            }
            Err(err) => {
                let class = err.class();
                let Some(error_class) = class.error_class() else {
                    outcome.cancelled = true;
                    return outcome;
                };
                tracing::warn!(
                    storefront = %storefront.slug,
                    point = %batch.point.key,
                    attempts = retried.attempts,
                    class = %error_class,
                    error = %err,
                    "probe failed"
                );
                for task in &tasks {
                    let row = record::from_failure(
                        task,
                        &err,
                        error_class,
                        retried.attempts,
                        captured_at,
                        self.config.diagnostic_max_bytes,
                    );
                    outcome.tally.failed += 1;
                    if class == FailureClass::Blocked {
                        outcome.tally.blocked += 1;
                    }
                    self.persist(row, &mut outcome).await;
                }
            }
        }

        outcome
    }

    async fn persist(&self, row: ProbeResult, outcome: &mut BatchOutcome) {
        outcome.tally.checks += 1;
        if let Err(e) = self.sink.upsert(&row).await {
            tracing::error!(identity = %row.identity, error = %e, "failed to persist probe result");
            outcome.tally.persist_errors += 1;
        }
        outcome.rows.push(row);
    }

    async fn report_discovery(&self, storefront: &str, point_key: &str, option_id: &str) {
        tracing::info!(storefront, point = point_key, option_id, "discovered fulfillment option id");
        if let Err(e) = self
            .catalog
            .report_option_id(storefront, point_key, option_id)
            .await
        {
            tracing::warn!(storefront, point = point_key, error = %e, "failed to report option id");
        }
    }
}
