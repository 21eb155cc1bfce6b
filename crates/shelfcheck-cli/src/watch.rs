//! `probe watch`: recurring sweeps on a cron schedule.

use std::sync::Arc;

use shelfcheck_core::{AppConfig, Storefront};
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::probe::{run_recorded_sweep, summary_lines};

/// Registers the sweep job and runs the scheduler until `cancel` fires.
///
/// A tick that arrives while the previous sweep is still running is skipped.
///
/// # Errors
///
/// Returns an error if `cron` is invalid or the scheduler cannot start or
/// shut down.
pub(crate) async fn run_watch(
    pool: PgPool,
    config: Arc<AppConfig>,
    storefronts: Arc<Vec<Storefront>>,
    http: reqwest::Client,
    filter: Option<String>,
    cron: &str,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut scheduler = JobScheduler::new().await?;
    let running = Arc::new(Mutex::new(()));
    let job_cancel = cancel.clone();

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let pool = pool.clone();
        let config = Arc::clone(&config);
        let storefronts = Arc::clone(&storefronts);
        let http = http.clone();
        let filter = filter.clone();
        let running = Arc::clone(&running);
        let cancel = job_cancel.clone();

        Box::pin(async move {
            let Ok(_guard) = running.try_lock() else {
                tracing::warn!("scheduler: previous probe sweep still running; skipping tick");
                return;
            };
            if cancel.is_cancelled() {
                return;
            }

            tracing::info!("scheduler: starting probe sweep");
            match run_recorded_sweep(
                &pool,
                &config,
                storefronts.to_vec(),
                http,
                filter.as_deref(),
                "watch",
                &cancel,
            )
            .await
            {
                Ok(summary) => {
                    for line in summary_lines(&summary) {
                        tracing::info!("{line}");
                    }
                }
                Err(e) => tracing::error!(error = %e, "scheduler: probe sweep failed"),
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    tracing::info!(cron = %cron, "scheduler: registered probe sweep job");

    cancel.cancelled().await;
    scheduler.shutdown().await?;
    tracing::info!("scheduler: stopped");
    Ok(())
}
