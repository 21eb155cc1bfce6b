//! Database operations for the catalog tables: `tracked_items`,
//! `sku_mappings`, and `fulfillment_points`.

use chrono::{DateTime, Utc};
use shelfcheck_core::{FulfillmentPoint, GeoPoint, TrackedItem};
use sqlx::PgPool;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `fulfillment_points` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FulfillmentPointRow {
    pub id: i64,
    pub storefront: String,
    pub point_key: String,
    pub postal_code: Option<String>,
    /// Always set together with `longitude` (enforced by a CHECK constraint).
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub external_option_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<FulfillmentPointRow> for FulfillmentPoint {
    fn from(row: FulfillmentPointRow) -> Self {
        let geo = match (row.latitude, row.longitude) {
            (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
            _ => None,
        };
        FulfillmentPoint {
            key: row.point_key,
            postal_code: row.postal_code,
            geo,
            external_option_id: row.external_option_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TrackedItemRow {
    sku_id: String,
    seller_id: String,
    merchandise_key: String,
}

const POINT_COLUMNS: &str = "id, storefront, point_key, postal_code, latitude, longitude, \
     external_option_id, is_active, created_at, updated_at";

// ---------------------------------------------------------------------------
// tracked_items / sku_mappings
// ---------------------------------------------------------------------------

/// Inserts a tracked item, or reactivates and relabels an existing one.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_tracked_item(
    pool: &PgPool,
    merchandise_key: &str,
    label: Option<&str>,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO tracked_items (merchandise_key, label) \
         VALUES ($1, $2) \
         ON CONFLICT (merchandise_key) DO UPDATE SET \
             label      = COALESCE(EXCLUDED.label, tracked_items.label), \
             is_active  = TRUE, \
             updated_at = NOW()",
    )
    .bind(merchandise_key)
    .bind(label)
    .execute(pool)
    .await?;

    Ok(())
}

/// Merchandise keys of every active tracked item, in key order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_tracked_merchandise_keys(pool: &PgPool) -> Result<Vec<String>, DbError> {
    let keys = sqlx::query_scalar::<_, String>(
        "SELECT merchandise_key FROM tracked_items \
         WHERE is_active = TRUE \
         ORDER BY merchandise_key",
    )
    .fetch_all(pool)
    .await?;

    Ok(keys)
}

/// Maps a tracked item to a storefront's SKU and seller.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails (including when
/// `merchandise_key` is not a tracked item).
pub async fn upsert_sku_mapping(
    pool: &PgPool,
    storefront: &str,
    merchandise_key: &str,
    sku_id: &str,
    seller_id: &str,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO sku_mappings (storefront, merchandise_key, sku_id, seller_id) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (storefront, merchandise_key) DO UPDATE SET \
             sku_id     = EXCLUDED.sku_id, \
             seller_id  = EXCLUDED.seller_id, \
             updated_at = NOW()",
    )
    .bind(storefront)
    .bind(merchandise_key)
    .bind(sku_id)
    .bind(seller_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Resolves merchandise keys to `storefront`'s SKUs. Keys without a mapping
/// for that storefront are skipped.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn resolve_tracked_items(
    pool: &PgPool,
    storefront: &str,
    merchandise_keys: &[String],
) -> Result<Vec<TrackedItem>, DbError> {
    if merchandise_keys.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query_as::<_, TrackedItemRow>(
        "SELECT m.sku_id, m.seller_id, m.merchandise_key \
         FROM sku_mappings m \
         JOIN tracked_items t ON t.merchandise_key = m.merchandise_key \
         WHERE m.storefront = $1 \
           AND m.merchandise_key = ANY($2) \
           AND t.is_active = TRUE \
         ORDER BY m.merchandise_key",
    )
    .bind(storefront)
    .bind(merchandise_keys)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| TrackedItem {
            sku_id: r.sku_id,
            seller_id: r.seller_id,
            merchandise_key: r.merchandise_key,
        })
        .collect())
}

/// Merchandise key a storefront SKU is mapped from, if any.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn find_merchandise_key(
    pool: &PgPool,
    storefront: &str,
    sku_id: &str,
    seller_id: &str,
) -> Result<Option<String>, DbError> {
    let key = sqlx::query_scalar::<_, String>(
        "SELECT merchandise_key FROM sku_mappings \
         WHERE storefront = $1 AND sku_id = $2 AND seller_id = $3 \
         LIMIT 1",
    )
    .bind(storefront)
    .bind(sku_id)
    .bind(seller_id)
    .fetch_optional(pool)
    .await?;

    Ok(key)
}

// ---------------------------------------------------------------------------
// fulfillment_points
// ---------------------------------------------------------------------------

/// Inserts or updates a fulfillment point. An existing discovered
/// `external_option_id` is kept when `point.external_option_id` is `None`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_fulfillment_point(
    pool: &PgPool,
    storefront: &str,
    point: &FulfillmentPoint,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO fulfillment_points \
             (storefront, point_key, postal_code, latitude, longitude, external_option_id) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (storefront, point_key) DO UPDATE SET \
             postal_code        = EXCLUDED.postal_code, \
             latitude           = EXCLUDED.latitude, \
             longitude          = EXCLUDED.longitude, \
             external_option_id = COALESCE(EXCLUDED.external_option_id, \
                                           fulfillment_points.external_option_id), \
             is_active          = TRUE, \
             updated_at         = NOW()",
    )
    .bind(storefront)
    .bind(&point.key)
    .bind(point.postal_code.as_deref())
    .bind(point.geo.map(|g| g.lat))
    .bind(point.geo.map(|g| g.lon))
    .bind(point.external_option_id.as_deref())
    .execute(pool)
    .await?;

    Ok(())
}

/// Active fulfillment points for a storefront, in key order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_fulfillment_points(
    pool: &PgPool,
    storefront: &str,
) -> Result<Vec<FulfillmentPoint>, DbError> {
    let rows = sqlx::query_as::<_, FulfillmentPointRow>(&format!(
        "SELECT {POINT_COLUMNS} FROM fulfillment_points \
         WHERE storefront = $1 AND is_active = TRUE \
         ORDER BY point_key"
    ))
    .bind(storefront)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(FulfillmentPoint::from).collect())
}

/// Fetches one fulfillment point by key.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no such point exists, or
/// [`DbError::Sqlx`] if the query fails.
pub async fn get_fulfillment_point(
    pool: &PgPool,
    storefront: &str,
    point_key: &str,
) -> Result<FulfillmentPoint, DbError> {
    let row = sqlx::query_as::<_, FulfillmentPointRow>(&format!(
        "SELECT {POINT_COLUMNS} FROM fulfillment_points \
         WHERE storefront = $1 AND point_key = $2"
    ))
    .bind(storefront)
    .bind(point_key)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row.into())
}

/// Stores a discovered storefront-side pickup option id for a point.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the point does not exist, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn update_external_option_id(
    pool: &PgPool,
    storefront: &str,
    point_key: &str,
    option_id: &str,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE fulfillment_points \
         SET external_option_id = $3, updated_at = NOW() \
         WHERE storefront = $1 AND point_key = $2",
    )
    .bind(storefront)
    .bind(point_key)
    .bind(option_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
