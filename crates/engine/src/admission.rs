//! Admission controller: per-organization rate window and quota ledger.
//!
//! Two gates are evaluated in order: a fixed-window rate limit and a quota
//! check that reserves a `pending` slot. Delivery outcomes later settle the
//! reservation into `committed` (or release it).
//!
//! Every mutation is a single-key atomic `INCR`/`DECR`; the check-then-reserve
//! sequence across `committed` and `pending` is not linearizable, so a burst
//! of concurrent requests may overshoot the quota by at most the number of
//! requests racing through the check.
//!
//! Keys:
//! - `rate:<org>`    request counter, 60 s window from first use
//! - `quota:<org>`   committed (delivered) count, 24 h window
//! - `pending:<org>` reserved-but-unresolved count, 24 h window

use std::sync::Arc;

use notigate_common::cache::{Cache, get_counter};
use notigate_common::error::GatewayError;
use notigate_common::types::Organization;

/// Default ceiling of the rate window.
pub const DEFAULT_RATE_LIMIT: u64 = 100;

/// Length of the rate window in seconds.
pub const RATE_WINDOW_SECS: u64 = 60;

/// Lifetime of the quota counters in seconds.
pub const QUOTA_WINDOW_SECS: u64 = 86_400;

/// Snapshot of an organization's quota counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLedger {
    pub committed: i64,
    pub pending: i64,
}

impl QuotaLedger {
    pub fn used(&self) -> i64 {
        self.committed + self.pending
    }
}

/// How a reservation is resolved once the notification reaches a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Delivered,
    Failed,
}

pub struct AdmissionController {
    cache: Arc<dyn Cache>,
    rate_limit: u64,
}

impl AdmissionController {
    pub fn new(cache: Arc<dyn Cache>, rate_limit: u64) -> Self {
        Self { cache, rate_limit }
    }

    pub fn rate_key(org_id: &str) -> String {
        format!("rate:{}", org_id)
    }

    pub fn committed_key(org_id: &str) -> String {
        format!("quota:{}", org_id)
    }

    pub fn pending_key(org_id: &str) -> String {
        format!("pending:{}", org_id)
    }

    /// Count this request against the organization's rate window.
    ///
    /// The first hit opens a 60 s window. Rejected requests still count; the
    /// window decays on its own.
    pub async fn check_rate(&self, org_id: &str) -> Result<(), GatewayError> {
        let key = Self::rate_key(org_id);
        let current = self.cache.incr(&key, 1).await?;
        if current == 1 {
            self.cache.expire(&key, RATE_WINDOW_SECS).await?;
        }

        if current > self.rate_limit as i64 {
            tracing::info!(
                org_id,
                current,
                limit = self.rate_limit,
                "Request rejected: rate limit exceeded"
            );
            return Err(GatewayError::RateLimited {
                limit: self.rate_limit,
            });
        }
        Ok(())
    }

    /// Read the organization's committed and pending counters concurrently.
    pub async fn ledger(&self, org_id: &str) -> Result<QuotaLedger, GatewayError> {
        let committed_key = Self::committed_key(org_id);
        let pending_key = Self::pending_key(org_id);
        let (committed, pending) = tokio::join!(
            get_counter(self.cache.as_ref(), &committed_key),
            get_counter(self.cache.as_ref(), &pending_key),
        );
        Ok(QuotaLedger {
            committed: committed?,
            pending: pending?.max(0),
        })
    }

    /// Reserve one pending slot if `committed + pending` is below the limit.
    pub async fn reserve(&self, org: &Organization) -> Result<QuotaLedger, GatewayError> {
        let ledger = self.ledger(&org.id).await?;
        if ledger.used() >= org.quota_limit {
            tracing::info!(
                org_id = %org.id,
                committed = ledger.committed,
                pending = ledger.pending,
                limit = org.quota_limit,
                "Request rejected: quota exhausted"
            );
            return Err(GatewayError::QuotaExceeded {
                limit: org.quota_limit,
            });
        }

        let key = Self::pending_key(&org.id);
        let pending = self.cache.incr(&key, 1).await?;
        if pending == 1 {
            // First reservation in the window: stale reservations age out
            self.cache.expire(&key, QUOTA_WINDOW_SECS).await?;
        }

        Ok(QuotaLedger {
            committed: ledger.committed,
            pending,
        })
    }

    /// Give back a reservation that will never reach a worker.
    pub async fn release(&self, org_id: &str) -> Result<(), GatewayError> {
        self.decrement_pending(org_id).await
    }

    /// Resolve a reservation after a terminal delivery outcome.
    pub async fn settle(&self, org_id: &str, settlement: Settlement) -> Result<(), GatewayError> {
        self.decrement_pending(org_id).await?;

        if settlement == Settlement::Delivered {
            let key = Self::committed_key(org_id);
            let committed = self.cache.incr(&key, 1).await?;
            if committed == 1 {
                self.cache.expire(&key, QUOTA_WINDOW_SECS).await?;
            }
        }

        tracing::debug!(org_id, ?settlement, "Quota settled");
        Ok(())
    }

    /// Decrement `pending`, undoing our own step if it went below zero.
    ///
    /// Each over-decrement is compensated by exactly one increment, so
    /// concurrent duplicate settlements converge back to zero.
    async fn decrement_pending(&self, org_id: &str) -> Result<(), GatewayError> {
        let key = Self::pending_key(org_id);
        let pending = self.cache.incr(&key, -1).await?;
        if pending < 0 {
            tracing::warn!(org_id, pending, "Pending counter underflow, compensating");
            self.cache.incr(&key, 1).await?;
        }
        Ok(())
    }
}
