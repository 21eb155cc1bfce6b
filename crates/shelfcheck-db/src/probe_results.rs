//! Database operations for `probe_results`.
//!
//! One row per result identity, last-write-wins on `captured_at`. The
//! conflict branch of the upsert only fires when the incoming capture is at
//! least as recent as the stored one.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use shelfcheck_core::{ErrorClass, ProbeResult, ResultIdentity};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `probe_results` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProbeResultRow {
    pub id: i64,
    pub storefront: String,
    pub fulfillment_point: String,
    pub sku_id: String,
    pub seller_id: String,
    pub sales_channel: String,
    pub merchandise_key: String,
    pub available: bool,
    pub quantity: Option<i32>,
    pub price: Option<Decimal>,
    pub list_price: Option<Decimal>,
    pub currency_code: String,
    pub captured_at: DateTime<Utc>,
    /// Snake-case [`shelfcheck_core::ErrorClass`] name, `NULL` on success.
    pub error_class: Option<String>,
    pub error_message: Option<String>,
    pub diagnostic: Option<String>,
    pub fulfillment_option_id: Option<String>,
    pub run_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

const SELECT_COLUMNS: &str = "id, storefront, fulfillment_point, sku_id, seller_id, sales_channel, \
     merchandise_key, available, quantity, price, list_price, currency_code, captured_at, \
     error_class, error_message, diagnostic, fulfillment_option_id, run_id, updated_at";

/// Inserts or replaces the stored result for `result.identity`.
///
/// Returns `true` if the row was written and `false` if a newer capture was
/// already stored.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the statement fails.
pub async fn upsert_probe_result(
    pool: &PgPool,
    result: &ProbeResult,
    run_id: Option<i64>,
) -> Result<bool, DbError> {
    let id = &result.identity;
    let outcome = sqlx::query(
        "INSERT INTO probe_results \
             (storefront, fulfillment_point, sku_id, seller_id, sales_channel, \
              merchandise_key, available, quantity, price, list_price, currency_code, \
              captured_at, error_class, error_message, diagnostic, fulfillment_option_id, run_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
         ON CONFLICT ON CONSTRAINT probe_results_identity DO UPDATE SET \
             merchandise_key       = EXCLUDED.merchandise_key, \
             available             = EXCLUDED.available, \
             quantity              = EXCLUDED.quantity, \
             price                 = EXCLUDED.price, \
             list_price            = EXCLUDED.list_price, \
             currency_code         = EXCLUDED.currency_code, \
             captured_at           = EXCLUDED.captured_at, \
             error_class           = EXCLUDED.error_class, \
             error_message         = EXCLUDED.error_message, \
             diagnostic            = EXCLUDED.diagnostic, \
             fulfillment_option_id = EXCLUDED.fulfillment_option_id, \
             run_id                = EXCLUDED.run_id, \
             updated_at            = NOW() \
         WHERE probe_results.captured_at <= EXCLUDED.captured_at",
    )
    .bind(&id.storefront)
    .bind(&id.fulfillment_point)
    .bind(&id.sku_id)
    .bind(&id.seller_id)
    .bind(&id.sales_channel)
    .bind(&result.merchandise_key)
    .bind(result.available)
    .bind(result.quantity)
    .bind(result.price)
    .bind(result.list_price)
    .bind(&result.currency_code)
    .bind(result.captured_at)
    .bind(result.error_class.map(ErrorClass::as_str))
    .bind(result.error_message.as_deref())
    .bind(result.diagnostic.as_deref())
    .bind(result.fulfillment_option_id.as_deref())
    .bind(run_id)
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected() == 1)
}

/// Fetches the stored result for one identity, if any.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_probe_result(
    pool: &PgPool,
    identity: &ResultIdentity,
) -> Result<Option<ProbeResultRow>, DbError> {
    let row = sqlx::query_as::<_, ProbeResultRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM probe_results \
         WHERE storefront = $1 AND fulfillment_point = $2 AND sku_id = $3 \
           AND seller_id = $4 AND sales_channel = $5"
    ))
    .bind(&identity.storefront)
    .bind(&identity.fulfillment_point)
    .bind(&identity.sku_id)
    .bind(&identity.seller_id)
    .bind(&identity.sales_channel)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Returns the most recently captured results for a storefront.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_probe_results(
    pool: &PgPool,
    storefront: &str,
    limit: i64,
) -> Result<Vec<ProbeResultRow>, DbError> {
    let rows = sqlx::query_as::<_, ProbeResultRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM probe_results \
         WHERE storefront = $1 \
         ORDER BY captured_at DESC, id DESC \
         LIMIT $2"
    ))
    .bind(storefront)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
