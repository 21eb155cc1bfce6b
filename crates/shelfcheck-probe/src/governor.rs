//! Concurrency caps and request pacing per storefront.
//!
//! A [`Lease`] holds one global slot and one slot of the target storefront.
//! Both are returned when the lease is dropped, whichever way the request
//! ends. Pacing is enforced at lease time: two leases for the same storefront
//! are never issued closer together than the configured minimum interval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ProbeError;

#[derive(Debug, Clone, Copy)]
pub struct GovernorConfig {
    pub global_max_in_flight: usize,
    pub host_max_in_flight: usize,
    pub min_interval: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            global_max_in_flight: 10,
            host_max_in_flight: 4,
            min_interval: Duration::from_millis(250),
        }
    }
}

/// Current and peak in-flight counts.
#[derive(Debug, Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

struct HostGate {
    permits: Arc<Semaphore>,
    last_issued: tokio::sync::Mutex<Option<Instant>>,
    in_flight: InFlight,
}

pub struct RateGovernor {
    config: GovernorConfig,
    global: Arc<Semaphore>,
    global_in_flight: Arc<InFlight>,
    hosts: Mutex<HashMap<String, Arc<HostGate>>>,
}

/// Scoped permission to issue one request to one storefront.
pub struct Lease {
    _global: OwnedSemaphorePermit,
    _host: OwnedSemaphorePermit,
    gate: Arc<HostGate>,
    global_in_flight: Arc<InFlight>,
    issued_at: Instant,
}

impl Lease {
    /// When pacing released this lease.
    #[must_use]
    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.gate.in_flight.exit();
        self.global_in_flight.exit();
    }
}

impl RateGovernor {
    #[must_use]
    pub fn new(config: GovernorConfig) -> Self {
        let global_max = config.global_max_in_flight.max(1);
        Self {
            config,
            global: Arc::new(Semaphore::new(global_max)),
            global_in_flight: Arc::new(InFlight::default()),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> GovernorConfig {
        self.config
    }

    /// Waits for a storefront slot, a global slot, and the pacing interval,
    /// in that order.
    ///
    /// The storefront slot is taken first so that a task queued behind a busy
    /// storefront does not sit on a global slot other storefronts could use.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Cancelled`] if `cancel` fires while waiting.
    pub async fn acquire(
        &self,
        host: &str,
        cancel: &CancellationToken,
    ) -> Result<Lease, ProbeError> {
        let gate = self.gate(host);

        let host_permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProbeError::Cancelled),
            permit = Arc::clone(&gate.permits).acquire_owned() => {
                permit.map_err(|_| ProbeError::Cancelled)?
            }
        };

        let global_permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProbeError::Cancelled),
            permit = Arc::clone(&self.global).acquire_owned() => {
                permit.map_err(|_| ProbeError::Cancelled)?
            }
        };

        let issued_at = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProbeError::Cancelled),
            issued_at = self.wait_for_spacing(&gate) => issued_at,
        };

        gate.in_flight.enter();
        self.global_in_flight.enter();

        tracing::trace!(host, "lease issued");

        Ok(Lease {
            _global: global_permit,
            _host: host_permit,
            gate,
            global_in_flight: Arc::clone(&self.global_in_flight),
            issued_at,
        })
    }

    /// Highest number of simultaneous leases observed across all storefronts.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.global_in_flight.peak.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous leases observed for `host`.
    #[must_use]
    pub fn host_peak_in_flight(&self, host: &str) -> usize {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .map_or(0, |gate| gate.in_flight.peak.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.global_in_flight.current.load(Ordering::SeqCst)
    }

    fn gate(&self, host: &str) -> Arc<HostGate> {
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        let gate = hosts.entry(host.to_owned()).or_insert_with(|| {
            Arc::new(HostGate {
                permits: Arc::new(Semaphore::new(self.config.host_max_in_flight.max(1))),
                last_issued: tokio::sync::Mutex::new(None),
                in_flight: InFlight::default(),
            })
        });
        Arc::clone(gate)
    }

    /// Holds the storefront's pacing lock until `min_interval` has elapsed
    /// since the previous lease, then stamps the new issue time.
    async fn wait_for_spacing(&self, gate: &HostGate) -> Instant {
        let mut last = gate.last_issued.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.config.min_interval;
            if Instant::now() < ready_at {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        let now = Instant::now();
        *last = Some(now);
        now
    }
}
