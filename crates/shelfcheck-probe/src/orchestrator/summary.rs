use crate::session::WarmupReport;

/// Per-storefront counts for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorefrontSummary {
    pub slug: String,
    /// Tasks that reached a persisted outcome.
    pub checks: usize,
    pub available: usize,
    /// Terminal failures (retries exhausted, blocked, permanent).
    pub failed: usize,
    /// Subset of `failed` classified as blocked.
    pub blocked: usize,
    /// Responses missing an expected field; counted in `checks`, not `failed`.
    pub partial: usize,
    /// Rows the sink refused to write.
    pub persist_errors: usize,
    pub discovered_options: usize,
    pub warmup: WarmupReport,
    /// Storefront-level failure that stopped its sweep early.
    pub error: Option<String>,
    /// Cancellation interrupted this storefront before all tasks ran.
    pub cancelled: bool,
}

impl StorefrontSummary {
    #[must_use]
    pub fn new(slug: &str) -> Self {
        Self {
            slug: slug.to_owned(),
            ..Self::default()
        }
    }

    pub(crate) fn absorb(&mut self, tally: &Tally) {
        self.checks += tally.checks;
        self.available += tally.available;
        self.failed += tally.failed;
        self.blocked += tally.blocked;
        self.partial += tally.partial;
        self.persist_errors += tally.persist_errors;
    }
}

/// Totals for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total_storefronts: usize,
    pub total_checks: usize,
    pub total_available: usize,
    pub total_failed: usize,
    pub per_storefront: Vec<StorefrontSummary>,
    /// `"{slug}: {message}"` for every storefront-level failure.
    pub errors: Vec<String>,
    /// Highest number of simultaneous storefront requests observed.
    pub peak_in_flight: usize,
    pub cancelled: bool,
}

impl RunSummary {
    pub(crate) fn record(&mut self, storefront: StorefrontSummary) {
        self.total_storefronts += 1;
        self.total_checks += storefront.checks;
        self.total_available += storefront.available;
        self.total_failed += storefront.failed;
        if let Some(error) = &storefront.error {
            self.errors.push(format!("{}: {error}", storefront.slug));
        }
        self.per_storefront.push(storefront);
    }
}

/// Counts from one batch of tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Tally {
    pub checks: usize,
    pub available: usize,
    pub failed: usize,
    pub blocked: usize,
    pub partial: usize,
    pub persist_errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_rolls_up_totals_and_errors() {
        let mut run = RunSummary::default();
        let mut a = StorefrontSummary::new("a");
        a.absorb(&Tally {
            checks: 4,
            available: 3,
            failed: 1,
            blocked: 1,
            ..Tally::default()
        });
        let mut b = StorefrontSummary::new("b");
        b.error = Some("catalog backend error: timeout".to_owned());

        run.record(a);
        run.record(b);

        assert_eq!(run.total_storefronts, 2);
        assert_eq!(run.total_checks, 4);
        assert_eq!(run.total_available, 3);
        assert_eq!(run.total_failed, 1);
        assert_eq!(run.errors, vec!["b: catalog backend error: timeout"]);
    }
}
