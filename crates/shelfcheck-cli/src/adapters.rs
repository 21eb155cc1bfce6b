//! Postgres-backed implementations of the probe engine's collaborator traits.
//!
//! Storefronts come from the YAML registry; tracked items, SKU mappings, and
//! fulfillment points come from the database.

use std::future::Future;

use shelfcheck_core::{FulfillmentPoint, ProbeResult, Storefront, TrackedItem};
use shelfcheck_db::DbError;
use shelfcheck_probe::{Catalog, CatalogError, ResultSink, SinkError, UpsertOutcome};
use sqlx::PgPool;

fn catalog_backend(e: DbError) -> CatalogError {
    CatalogError::Backend(Box::new(e))
}

pub(crate) struct PgCatalog {
    pool: PgPool,
    storefronts: Vec<Storefront>,
}

impl PgCatalog {
    pub(crate) fn new(pool: PgPool, storefronts: Vec<Storefront>) -> Self {
        Self { pool, storefronts }
    }

    fn known(&self, slug: &str) -> Result<(), CatalogError> {
        if self.storefronts.iter().any(|s| s.slug == slug) {
            Ok(())
        } else {
            Err(CatalogError::UnknownStorefront(slug.to_owned()))
        }
    }
}

impl Catalog for PgCatalog {
    fn enabled_storefronts(
        &self,
        filter: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Storefront>, CatalogError>> + Send {
        let storefronts: Vec<Storefront> = self
            .storefronts
            .iter()
            .filter(|s| s.enabled)
            .filter(|s| filter.is_none_or(|slug| s.slug == slug))
            .cloned()
            .collect();
        async move { Ok(storefronts) }
    }

    fn tracked_items(&self) -> impl Future<Output = Result<Vec<String>, CatalogError>> + Send {
        async move {
            shelfcheck_db::list_tracked_merchandise_keys(&self.pool)
                .await
                .map_err(catalog_backend)
        }
    }

    fn resolve_items(
        &self,
        storefront: &str,
        merchandise_keys: &[String],
    ) -> impl Future<Output = Result<Vec<TrackedItem>, CatalogError>> + Send {
        async move {
            self.known(storefront)?;
            shelfcheck_db::resolve_tracked_items(&self.pool, storefront, merchandise_keys)
                .await
                .map_err(catalog_backend)
        }
    }

    fn fulfillment_points(
        &self,
        storefront: &str,
    ) -> impl Future<Output = Result<Vec<FulfillmentPoint>, CatalogError>> + Send {
        async move {
            self.known(storefront)?;
            shelfcheck_db::list_fulfillment_points(&self.pool, storefront)
                .await
                .map_err(catalog_backend)
        }
    }

    fn report_option_id(
        &self,
        storefront: &str,
        point_key: &str,
        option_id: &str,
    ) -> impl Future<Output = Result<(), CatalogError>> + Send {
        async move {
            shelfcheck_db::update_external_option_id(&self.pool, storefront, point_key, option_id)
                .await
                .map_err(catalog_backend)
        }
    }
}

/// Writes probe results to `probe_results`, tagged with the sweep's run id.
pub(crate) struct PgResultSink {
    pool: PgPool,
    run_id: Option<i64>,
}

impl PgResultSink {
    pub(crate) fn new(pool: PgPool, run_id: Option<i64>) -> Self {
        Self { pool, run_id }
    }
}

impl ResultSink for PgResultSink {
    fn upsert(
        &self,
        result: &ProbeResult,
    ) -> impl Future<Output = Result<UpsertOutcome, SinkError>> + Send {
        async move {
            let written = shelfcheck_db::upsert_probe_result(&self.pool, result, self.run_id)
                .await
                .map_err(|e| SinkError::Backend(Box::new(e)))?;
            Ok(if written {
                UpsertOutcome::Written
            } else {
                UpsertOutcome::Stale
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use shelfcheck_core::{AvailabilityRule, FulfillmentMode, ResultIdentity, SalesChannel};

    fn storefront(slug: &str, enabled: bool) -> Storefront {
        Storefront {
            slug: slug.to_owned(),
            base_url: format!("https://{slug}.example"),
            enabled,
            sales_channels: vec![SalesChannel {
                id: "1".to_owned(),
                currency: "BRL".to_owned(),
                locale: "pt-BR".to_owned(),
                country: "BRA".to_owned(),
            }],
            fulfillment_mode: FulfillmentMode::Auto,
            availability_rule: AvailabilityRule::Strict,
        }
    }

    fn result(captured_at: chrono::DateTime<Utc>, available: bool) -> ProbeResult {
        ProbeResult {
            identity: ResultIdentity {
                storefront: "mercado-norte".to_owned(),
                fulfillment_point: "store-17".to_owned(),
                sku_id: "42".to_owned(),
                seller_id: "1".to_owned(),
                sales_channel: "1".to_owned(),
            },
            merchandise_key: "7891000100103".to_owned(),
            available,
            quantity: Some(1),
            price: Some(Decimal::new(500, 2)),
            list_price: None,
            currency_code: "BRL".to_owned(),
            captured_at,
            error_class: None,
            error_message: None,
            diagnostic: None,
            fulfillment_option_id: None,
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn catalog_filters_registry_and_reads_points(pool: PgPool) {
        shelfcheck_db::upsert_fulfillment_point(
            &pool,
            "mercado-norte",
            &FulfillmentPoint {
                key: "store-17".to_owned(),
                postal_code: Some("01310-100".to_owned()),
                geo: None,
                external_option_id: None,
            },
        )
        .await
        .unwrap();
        let catalog = PgCatalog::new(
            pool.clone(),
            vec![
                storefront("mercado-norte", true),
                storefront("farmacia-sul", false),
            ],
        );

        let enabled = catalog.enabled_storefronts(None).await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].slug, "mercado-norte");

        let points = catalog.fulfillment_points("mercado-norte").await.unwrap();
        assert_eq!(points.len(), 1);

        catalog
            .report_option_id("mercado-norte", "store-17", "1_17")
            .await
            .unwrap();
        let stored = shelfcheck_db::get_fulfillment_point(&pool, "mercado-norte", "store-17")
            .await
            .unwrap();
        assert_eq!(stored.external_option_id.as_deref(), Some("1_17"));

        let err = catalog.fulfillment_points("unknown").await.unwrap_err();
        assert!(matches!(err, CatalogError::UnknownStorefront(_)));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn sink_reports_stale_writes(pool: PgPool) {
        let sink = PgResultSink::new(pool, None);
        let now = Utc::now();

        assert_eq!(
            sink.upsert(&result(now, true)).await.unwrap(),
            UpsertOutcome::Written
        );
        assert_eq!(
            sink.upsert(&result(now - Duration::seconds(30), false))
                .await
                .unwrap(),
            UpsertOutcome::Stale
        );
    }
}
