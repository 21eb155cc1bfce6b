//! `probe` command handlers.

use std::sync::Arc;

use anyhow::Context;
use clap::Subcommand;
use shelfcheck_core::{AppConfig, Storefront, TrackedItem};
use shelfcheck_db::{DbError, RunTotals};
use shelfcheck_probe::{
    build_http_client, Catalog, InMemoryCatalog, InMemorySink, Orchestrator, ResultSink,
    RunSummary, SingleProbe, SweepConfig, SweepError,
};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::adapters::{PgCatalog, PgResultSink};

/// Sub-commands available under `probe`.
#[derive(Debug, Subcommand)]
pub enum ProbeCommands {
    /// Probe every enabled storefront and persist the outcomes
    Sweep {
        /// Restrict the sweep to one storefront (by slug)
        #[arg(long)]
        storefront: Option<String>,
    },
    /// Probe one item at one fulfillment point
    Once {
        #[arg(long)]
        storefront: String,

        /// Fulfillment point key
        #[arg(long)]
        point: String,

        #[arg(long)]
        sku: String,

        #[arg(long, default_value = "1")]
        seller: String,

        /// Sales channel id; defaults to the storefront's first channel
        #[arg(long)]
        channel: Option<String>,

        /// Print the outcome without writing to the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Run sweeps on a cron schedule until interrupted
    Watch {
        /// Restrict each sweep to one storefront (by slug)
        #[arg(long)]
        storefront: Option<String>,

        /// Six-field cron expression; defaults to `SHELFCHECK_WATCH_CRON`
        #[arg(long)]
        cron: Option<String>,
    },
}

/// Dispatch a `probe` sub-command.
///
/// # Errors
///
/// Returns an error if the registry cannot be loaded, the database is
/// unreachable, or the command itself fails before probing starts.
pub(crate) async fn run(command: ProbeCommands, config: &AppConfig) -> anyhow::Result<()> {
    let registry = shelfcheck_core::load_storefronts(&config.storefronts_path)
        .with_context(|| format!("loading {}", config.storefronts_path.display()))?;
    let pool = crate::connect(config).await?;
    let http = build_http_client(config.request_timeout_secs, &config.user_agent)
        .context("building HTTP client")?;
    let cancel = crate::shutdown::cancel_on_shutdown();

    match command {
        ProbeCommands::Sweep { storefront } => {
            let summary = run_recorded_sweep(
                &pool,
                config,
                registry.storefronts,
                http,
                storefront.as_deref(),
                "cli",
                &cancel,
            )
            .await?;
            for line in summary_lines(&summary) {
                println!("{line}");
            }
        }
        ProbeCommands::Once {
            storefront,
            point,
            sku,
            seller,
            channel,
            dry_run,
        } => {
            let args = OnceArgs {
                storefront: &storefront,
                point: &point,
                sku: &sku,
                seller: &seller,
                channel: channel.as_deref(),
                dry_run,
            };
            let outcome =
                run_once(&pool, config, registry.storefronts, http, &args, &cancel).await?;
            println!("{}", single_line(&outcome));
        }
        ProbeCommands::Watch { storefront, cron } => {
            let cron = cron.unwrap_or_else(|| config.watch_cron.clone());
            crate::watch::run_watch(
                pool,
                Arc::new(config.clone()),
                Arc::new(registry.storefronts),
                http,
                storefront,
                &cron,
                cancel,
            )
            .await?;
        }
    }

    Ok(())
}

/// Runs one sweep against the database catalog and records it in
/// `probe_runs`. A cancelled sweep is recorded as failed.
///
/// # Errors
///
/// Returns an error if the run cannot be recorded or the sweep fails before
/// any network activity.
pub(crate) async fn run_recorded_sweep(
    pool: &PgPool,
    config: &AppConfig,
    storefronts: Vec<Storefront>,
    http: reqwest::Client,
    filter: Option<&str>,
    trigger_source: &str,
    cancel: &CancellationToken,
) -> anyhow::Result<RunSummary> {
    let run = shelfcheck_db::create_probe_run(pool, trigger_source, filter).await?;
    shelfcheck_db::start_probe_run(pool, run.id).await?;

    let orchestrator = Orchestrator::new(
        Arc::new(PgCatalog::new(pool.clone(), storefronts)),
        Arc::new(PgResultSink::new(pool.clone(), Some(run.id))),
        http,
        SweepConfig::from_app_config(config),
    );

    let summary = match orchestrator.run_sweep(filter, cancel).await {
        Ok(summary) => summary,
        Err(e) => {
            fail_run_best_effort(pool, run.id, e.to_string()).await;
            return Err(e.into());
        }
    };

    if summary.cancelled {
        fail_run_best_effort(
            pool,
            run.id,
            format!("cancelled after {} checks", summary.total_checks),
        )
        .await;
    } else {
        shelfcheck_db::complete_probe_run(
            pool,
            run.id,
            RunTotals {
                checks: summary.total_checks,
                available: summary.total_available,
                failed: summary.total_failed,
            },
        )
        .await?;
    }

    Ok(summary)
}

async fn fail_run_best_effort(pool: &PgPool, run_id: i64, message: String) {
    if let Err(mark_err) = shelfcheck_db::fail_probe_run(pool, run_id, &message).await {
        tracing::error!(run_id, error = %mark_err, "failed to mark probe run as failed");
    }
}

pub(crate) struct OnceArgs<'a> {
    pub storefront: &'a str,
    pub point: &'a str,
    pub sku: &'a str,
    pub seller: &'a str,
    pub channel: Option<&'a str>,
    pub dry_run: bool,
}

async fn run_once(
    pool: &PgPool,
    config: &AppConfig,
    storefronts: Vec<Storefront>,
    http: reqwest::Client,
    args: &OnceArgs<'_>,
    cancel: &CancellationToken,
) -> anyhow::Result<SingleProbe> {
    let point = match shelfcheck_db::get_fulfillment_point(pool, args.storefront, args.point).await
    {
        Ok(point) => point,
        Err(DbError::NotFound) => anyhow::bail!(
            "fulfillment point '{}' not found for storefront '{}'",
            args.point,
            args.storefront
        ),
        Err(e) => return Err(e.into()),
    };
    let merchandise_key =
        shelfcheck_db::find_merchandise_key(pool, args.storefront, args.sku, args.seller)
            .await?
            .unwrap_or_else(|| args.sku.to_owned());
    let item = TrackedItem {
        sku_id: args.sku.to_owned(),
        seller_id: args.seller.to_owned(),
        merchandise_key,
    };
    let sweep_config = SweepConfig::from_app_config(config);

    let outcome = if args.dry_run {
        // Nothing leaves the process: discovered ids and the result stay in memory.
        let storefront = storefronts
            .into_iter()
            .find(|s| s.slug == args.storefront)
            .with_context(|| format!("storefront '{}' is not configured", args.storefront))?;
        let catalog = InMemoryCatalog::new().with_storefront(
            storefront,
            vec![item.clone()],
            vec![point.clone()],
        );
        let orchestrator = Orchestrator::new(
            Arc::new(catalog),
            Arc::new(InMemorySink::default()),
            http,
            sweep_config,
        );
        probe_once_with(&orchestrator, point, item, args, cancel).await?
    } else {
        let orchestrator = Orchestrator::new(
            Arc::new(PgCatalog::new(pool.clone(), storefronts)),
            Arc::new(PgResultSink::new(pool.clone(), None)),
            http,
            sweep_config,
        );
        probe_once_with(&orchestrator, point, item, args, cancel).await?
    };

    Ok(outcome)
}

async fn probe_once_with<C: Catalog, S: ResultSink>(
    orchestrator: &Orchestrator<C, S>,
    point: shelfcheck_core::FulfillmentPoint,
    item: TrackedItem,
    args: &OnceArgs<'_>,
    cancel: &CancellationToken,
) -> Result<SingleProbe, SweepError> {
    orchestrator
        .probe_once(args.storefront, point, item, args.channel, cancel)
        .await
}

pub(crate) fn summary_lines(summary: &RunSummary) -> Vec<String> {
    let mut lines: Vec<String> = summary
        .per_storefront
        .iter()
        .map(|s| {
            let mut line = format!(
                "{}: checks={} available={} failed={} blocked={} partial={} discovered={}",
                s.slug, s.checks, s.available, s.failed, s.blocked, s.partial, s.discovered_options
            );
            if s.warmup.fully_failed() {
                line.push_str(&format!(
                    " warmup=failed({}/{})",
                    s.warmup.failed.len(),
                    s.warmup.failed.len() + s.warmup.succeeded
                ));
            }
            if s.persist_errors > 0 {
                line.push_str(&format!(" persist_errors={}", s.persist_errors));
            }
            if let Some(error) = &s.error {
                line.push_str(&format!(" error=\"{error}\""));
            }
            line
        })
        .collect();

    lines.push(format!(
        "total: storefronts={} checks={} available={} failed={} peak_in_flight={}{}",
        summary.total_storefronts,
        summary.total_checks,
        summary.total_available,
        summary.total_failed,
        summary.peak_in_flight,
        if summary.cancelled { " (cancelled)" } else { "" }
    ));
    lines
}

pub(crate) fn single_line(outcome: &SingleProbe) -> String {
    let result = &outcome.result;
    let verdict = if result.available {
        "available"
    } else {
        "unavailable"
    };
    let mut line = format!("{}: {verdict}", result.identity);
    if let Some(price) = result.price {
        line.push_str(&format!(" price={price} {}", result.currency_code));
    }
    if let Some(class) = result.error_class {
        line.push_str(&format!(" error_class={class}"));
    }
    if let Some(message) = &result.error_message {
        line.push_str(&format!(" error=\"{message}\""));
    }
    if let Some(option_id) = &outcome.discovered_option_id {
        line.push_str(&format!(" discovered_option={option_id}"));
    }
    line.push_str(&format!(" attempts={}", outcome.attempts));
    line
}
