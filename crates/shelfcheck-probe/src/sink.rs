//! Result sink: idempotent, last-write-wins persistence of probe outcomes.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, PoisonError};

use shelfcheck_core::{truncate_diagnostic, ProbeResult, ResultIdentity};
use thiserror::Error;

const DEFAULT_SHARDS: usize = 16;
const DEFAULT_DIAGNOSTIC_MAX_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("result sink backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Inserted, or replaced a row that was not newer.
    Written,
    /// The stored row is newer; nothing changed.
    Stale,
}

/// Durable store for [`ProbeResult`] rows, one current row per identity.
///
/// Implementations must write when no row exists for the identity or the
/// stored row's `captured_at` is not newer than the incoming one, and do
/// nothing otherwise. Concurrent upserts to different identities must not
/// contend on a single global lock.
pub trait ResultSink: Send + Sync {
    fn upsert(
        &self,
        result: &ProbeResult,
    ) -> impl Future<Output = Result<UpsertOutcome, SinkError>> + Send;
}

/// Sharded in-process sink. One lock per shard; identities hash to shards.
pub struct InMemorySink {
    shards: Vec<Mutex<HashMap<ResultIdentity, ProbeResult>>>,
    diagnostic_max_bytes: usize,
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS, DEFAULT_DIAGNOSTIC_MAX_BYTES)
    }
}

impl InMemorySink {
    #[must_use]
    pub fn new(shards: usize, diagnostic_max_bytes: usize) -> Self {
        Self {
            shards: (0..shards.max(1))
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
            diagnostic_max_bytes,
        }
    }

    /// Applies the last-write-wins rule synchronously.
    pub fn apply(&self, result: &ProbeResult) -> UpsertOutcome {
        let mut shard = self
            .shard(&result.identity)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(stored) = shard.get(&result.identity) {
            if !result.supersedes(stored) {
                return UpsertOutcome::Stale;
            }
        }

        let mut row = result.clone();
        row.diagnostic = row
            .diagnostic
            .map(|d| truncate_diagnostic(&d, self.diagnostic_max_bytes));
        shard.insert(row.identity.clone(), row);
        UpsertOutcome::Written
    }

    #[must_use]
    pub fn get(&self, identity: &ResultIdentity) -> Option<ProbeResult> {
        self.shard(identity)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored row, ordered by identity.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ProbeResult> {
        let mut rows: Vec<ProbeResult> = self
            .shards
            .iter()
            .flat_map(|s| {
                s.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .values()
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        rows.sort_by(|a, b| a.identity.cmp(&b.identity));
        rows
    }

    fn shard(&self, identity: &ResultIdentity) -> &Mutex<HashMap<ResultIdentity, ProbeResult>> {
        let mut hasher = DefaultHasher::new();
        identity.hash(&mut hasher);
        let len = self.shards.len() as u64;
        // Shard count fits in usize, so the remainder does too.
        let index = usize::try_from(hasher.finish() % len).unwrap_or(0);
        &self.shards[index]
    }
}

impl ResultSink for InMemorySink {
    fn upsert(
        &self,
        result: &ProbeResult,
    ) -> impl Future<Output = Result<UpsertOutcome, SinkError>> + Send {
        let outcome = self.apply(result);
        async move { Ok(outcome) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn result(sku: &str, captured_at: chrono::DateTime<Utc>, available: bool) -> ProbeResult {
        ProbeResult {
            identity: ResultIdentity {
                storefront: "mercado-norte".to_owned(),
                fulfillment_point: "pp-1".to_owned(),
                sku_id: sku.to_owned(),
                seller_id: "1".to_owned(),
                sales_channel: "1".to_owned(),
            },
            merchandise_key: format!("ean-{sku}"),
            available,
            quantity: None,
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

    #[tokio::test]
    async fn same_result_twice_leaves_state_unchanged() {
        let sink = InMemorySink::default();
        let row = result("42", Utc::now(), true);
        assert_eq!(sink.upsert(&row).await.unwrap(), UpsertOutcome::Written);
        let after_first = sink.get(&row.identity);
        sink.upsert(&row).await.unwrap();
        assert_eq!(sink.get(&row.identity), after_first);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn newer_replaces_and_older_is_stale() {
        let sink = InMemorySink::default();
        let t1 = Utc::now();
        let t2 = t1 + Duration::seconds(5);

        sink.upsert(&result("42", t1, true)).await.unwrap();
        let newer = result("42", t2, false);
        assert_eq!(sink.upsert(&newer).await.unwrap(), UpsertOutcome::Written);
        assert_eq!(
            sink.upsert(&result("42", t1, true)).await.unwrap(),
            UpsertOutcome::Stale
        );
        assert_eq!(sink.get(&newer.identity), Some(newer));
    }

    #[test]
    fn diagnostics_are_bounded_on_write() {
        let sink = InMemorySink::new(4, 8);
        let mut row = result("42", Utc::now(), false);
        row.diagnostic = Some("x".repeat(100));
        sink.apply(&row);
        let stored = sink.get(&row.identity).unwrap();
        assert_eq!(stored.diagnostic.as_deref(), Some("xxxxxxxx"));
    }

    #[tokio::test]
    async fn concurrent_upserts_to_one_identity_keep_newest() {
        let sink = Arc::new(InMemorySink::default());
        let base = Utc::now();
        let mut handles = Vec::new();
        for offset in 0..32 {
            let sink = Arc::clone(&sink);
            handles.push(tokio::spawn(async move {
                let row = result("42", base + Duration::milliseconds(offset), offset % 2 == 0);
                sink.upsert(&row).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let stored = sink.snapshot();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].captured_at, base + Duration::milliseconds(31));
    }

    #[test]
    fn snapshot_is_ordered_by_identity() {
        let sink = InMemorySink::default();
        let now = Utc::now();
        for sku in ["9", "1", "5"] {
            sink.apply(&result(sku, now, true));
        }
        let skus: Vec<_> = sink
            .snapshot()
            .into_iter()
            .map(|r| r.identity.sku_id)
            .collect();
        assert_eq!(skus, vec!["1", "5", "9"]);
    }
}
