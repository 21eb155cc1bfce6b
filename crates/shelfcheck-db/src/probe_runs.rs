//! Database operations for `probe_runs`, the sweep ledger.
//!
//! A run moves `queued` → `running` → `succeeded` | `failed`. Every
//! transition is guarded on the expected prior status.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `probe_runs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProbeRunRow {
    pub id: i64,
    pub public_id: Uuid,
    pub trigger_source: String,
    /// Storefront slug the run was restricted to, `NULL` for all.
    pub storefront_filter: Option<String>,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_checks: i32,
    pub total_available: i32,
    pub total_failed: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Counters recorded when a run completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub checks: usize,
    pub available: usize,
    pub failed: usize,
}

const RUN_COLUMNS: &str = "id, public_id, trigger_source, storefront_filter, status, \
     started_at, completed_at, total_checks, total_available, total_failed, \
     error_message, created_at";

fn to_column(column: &'static str, value: usize) -> Result<i32, DbError> {
    i32::try_from(value).map_err(|_| DbError::OutOfRange {
        column,
        value: value.to_string(),
    })
}

/// Creates a new run in `queued` status and returns it.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_probe_run(
    pool: &PgPool,
    trigger_source: &str,
    storefront_filter: Option<&str>,
) -> Result<ProbeRunRow, DbError> {
    let row = sqlx::query_as::<_, ProbeRunRow>(&format!(
        "INSERT INTO probe_runs (public_id, trigger_source, storefront_filter, status) \
         VALUES ($1, $2, $3, 'queued') \
         RETURNING {RUN_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(trigger_source)
    .bind(storefront_filter)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Marks a queued run as `running`.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the run is not queued, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn start_probe_run(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE probe_runs \
         SET status = 'running', started_at = NOW() \
         WHERE id = $1 AND status = 'queued'",
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "queued",
        });
    }

    Ok(())
}

/// Marks a running run as `succeeded` with its totals.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the run is not running,
/// [`DbError::OutOfRange`] if a counter does not fit the column, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn complete_probe_run(pool: &PgPool, id: i64, totals: RunTotals) -> Result<(), DbError> {
    let checks = to_column("total_checks", totals.checks)?;
    let available = to_column("total_available", totals.available)?;
    let failed = to_column("total_failed", totals.failed)?;

    let result = sqlx::query(
        "UPDATE probe_runs \
         SET status = 'succeeded', completed_at = NOW(), \
             total_checks = $1, total_available = $2, total_failed = $3 \
         WHERE id = $4 AND status = 'running'",
    )
    .bind(checks)
    .bind(available)
    .bind(failed)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "running",
        });
    }

    Ok(())
}

/// Marks a running run as `failed`.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the run is not running, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn fail_probe_run(pool: &PgPool, id: i64, error_message: &str) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE probe_runs \
         SET status = 'failed', completed_at = NOW(), error_message = $1 \
         WHERE id = $2 AND status = 'running'",
    )
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "running",
        });
    }

    Ok(())
}

/// Fetches a single run by its internal `id`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists with the given `id`, or
/// [`DbError::Sqlx`] if the query fails.
pub async fn get_probe_run(pool: &PgPool, id: i64) -> Result<ProbeRunRow, DbError> {
    let row = sqlx::query_as::<_, ProbeRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM probe_runs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Returns the most recent `limit` runs, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_probe_runs(pool: &PgPool, limit: i64) -> Result<Vec<ProbeRunRow>, DbError> {
    let rows = sqlx::query_as::<_, ProbeRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM probe_runs \
         ORDER BY created_at DESC, id DESC \
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_counter_is_out_of_range() {
        let err = to_column("total_checks", usize::MAX).unwrap_err();
        assert!(matches!(
            err,
            DbError::OutOfRange {
                column: "total_checks",
                ..
            }
        ));
        assert_eq!(to_column("total_checks", 12).unwrap(), 12);
    }
}
