//! Upstream collaborator supplying storefronts, items, and fulfillment points.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use shelfcheck_core::{FulfillmentPoint, Storefront, TrackedItem};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown storefront: {0}")]
    UnknownStorefront(String),

    #[error("catalog backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Read access to the tracked catalog, plus write-back of discovered
/// fulfillment option ids.
pub trait Catalog: Send + Sync {
    /// Enabled storefronts, optionally narrowed to one slug.
    fn enabled_storefronts(
        &self,
        filter: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Storefront>, CatalogError>> + Send;

    /// Merchandise keys of every tracked item.
    fn tracked_items(&self) -> impl Future<Output = Result<Vec<String>, CatalogError>> + Send;

    /// Which of `merchandise_keys` the storefront carries, and under which
    /// SKU and seller.
    fn resolve_items(
        &self,
        storefront: &str,
        merchandise_keys: &[String],
    ) -> impl Future<Output = Result<Vec<TrackedItem>, CatalogError>> + Send;

    fn fulfillment_points(
        &self,
        storefront: &str,
    ) -> impl Future<Output = Result<Vec<FulfillmentPoint>, CatalogError>> + Send;

    /// Records an option id learned from a probe.
    fn report_option_id(
        &self,
        storefront: &str,
        point_key: &str,
        option_id: &str,
    ) -> impl Future<Output = Result<(), CatalogError>> + Send;
}

/// Fixed catalog held in memory. Reported option ids are applied to the
/// stored points and kept for inspection.
#[derive(Default)]
pub struct InMemoryCatalog {
    storefronts: Vec<Storefront>,
    tracked: Vec<String>,
    items: HashMap<String, Vec<TrackedItem>>,
    points: Mutex<HashMap<String, Vec<FulfillmentPoint>>>,
    reported: Mutex<Vec<(String, String, String)>>,
}

impl InMemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_storefront(
        mut self,
        storefront: Storefront,
        items: Vec<TrackedItem>,
        points: Vec<FulfillmentPoint>,
    ) -> Self {
        for item in &items {
            if !self.tracked.contains(&item.merchandise_key) {
                self.tracked.push(item.merchandise_key.clone());
            }
        }
        self.items.insert(storefront.slug.clone(), items);
        self.points
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(storefront.slug.clone(), points);
        self.storefronts.push(storefront);
        self
    }

    /// Narrows the tracked list; keys not listed are never probed.
    #[must_use]
    pub fn with_tracked(mut self, merchandise_keys: Vec<String>) -> Self {
        self.tracked = merchandise_keys;
        self
    }

    /// `(storefront, point_key, option_id)` for every report received.
    #[must_use]
    pub fn reported_option_ids(&self) -> Vec<(String, String, String)> {
        self.reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn point(&self, storefront: &str, key: &str) -> Option<FulfillmentPoint> {
        self.points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(storefront)
            .and_then(|points| points.iter().find(|p| p.key == key).cloned())
    }

    fn known(&self, storefront: &str) -> Result<(), CatalogError> {
        if self.storefronts.iter().any(|s| s.slug == storefront) {
            Ok(())
        } else {
            Err(CatalogError::UnknownStorefront(storefront.to_owned()))
        }
    }
}

impl Catalog for InMemoryCatalog {
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
        let tracked = self.tracked.clone();
        async move { Ok(tracked) }
    }

    fn resolve_items(
        &self,
        storefront: &str,
        merchandise_keys: &[String],
    ) -> impl Future<Output = Result<Vec<TrackedItem>, CatalogError>> + Send {
        let resolved: Result<Vec<TrackedItem>, CatalogError> = self.known(storefront).map(|()| {
            self.items
                .get(storefront)
                .map(|items| {
                    items
                        .iter()
                        .filter(|i| merchandise_keys.contains(&i.merchandise_key))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        });
        async move { resolved }
    }

    fn fulfillment_points(
        &self,
        storefront: &str,
    ) -> impl Future<Output = Result<Vec<FulfillmentPoint>, CatalogError>> + Send {
        let points = self.known(storefront).map(|()| {
            self.points
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(storefront)
                .cloned()
                .unwrap_or_default()
        });
        async move { points }
    }

    fn report_option_id(
        &self,
        storefront: &str,
        point_key: &str,
        option_id: &str,
    ) -> impl Future<Output = Result<(), CatalogError>> + Send {
        let result = self.known(storefront).map(|()| {
            if let Some(point) = self
                .points
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_mut(storefront)
                .and_then(|points| points.iter_mut().find(|p| p.key == point_key))
            {
                point.external_option_id = Some(option_id.to_owned());
            }
            self.reported
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((
                    storefront.to_owned(),
                    point_key.to_owned(),
                    option_id.to_owned(),
                ));
        });
        async move { result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelfcheck_core::{AvailabilityRule, FulfillmentMode, SalesChannel};

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

    fn item(sku: &str, key: &str) -> TrackedItem {
        TrackedItem {
            sku_id: sku.to_owned(),
            seller_id: "1".to_owned(),
            merchandise_key: key.to_owned(),
        }
    }

    fn point(key: &str) -> FulfillmentPoint {
        FulfillmentPoint {
            key: key.to_owned(),
            postal_code: Some("01310-100".to_owned()),
            geo: None,
            external_option_id: None,
        }
    }

    #[tokio::test]
    async fn filters_disabled_and_by_slug() {
        let catalog = InMemoryCatalog::new()
            .with_storefront(storefront("a", true), Vec::new(), Vec::new())
            .with_storefront(storefront("b", false), Vec::new(), Vec::new())
            .with_storefront(storefront("c", true), Vec::new(), Vec::new());

        let all = catalog.enabled_storefronts(None).await.unwrap();
        assert_eq!(all.len(), 2);
        let one = catalog.enabled_storefronts(Some("c")).await.unwrap();
        assert_eq!(one[0].slug, "c");
        assert!(catalog.enabled_storefronts(Some("b")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolves_only_requested_keys() {
        let catalog = InMemoryCatalog::new().with_storefront(
            storefront("a", true),
            vec![item("42", "ean-1"), item("43", "ean-2")],
            Vec::new(),
        );
        let resolved = catalog
            .resolve_items("a", &["ean-2".to_owned()])
            .await
            .unwrap();
        assert_eq!(resolved, vec![item("43", "ean-2")]);
    }

    #[tokio::test]
    async fn reported_option_id_updates_point() {
        let catalog = InMemoryCatalog::new().with_storefront(
            storefront("a", true),
            Vec::new(),
            vec![point("store-17")],
        );
        catalog
            .report_option_id("a", "store-17", "1_17")
            .await
            .unwrap();
        assert_eq!(
            catalog.point("a", "store-17").unwrap().external_option_id.as_deref(),
            Some("1_17")
        );
        assert_eq!(catalog.reported_option_ids().len(), 1);
    }

    #[tokio::test]
    async fn unknown_storefront_is_an_error() {
        let catalog = InMemoryCatalog::new();
        let err = catalog.fulfillment_points("nope").await.unwrap_err();
        assert!(matches!(err, CatalogError::UnknownStorefront(_)));
    }
}
