//! Idempotency guard: replays the accepted response for a repeated request id.
//!
//! Records live in the cache under `idempotency:<org>:<request_id>` for a
//! bounded TTL. There is no lock around the existence check: two identical
//! requests racing each other may both be processed once.

use std::sync::Arc;

use notigate_common::cache::Cache;
use notigate_common::error::GatewayError;
use notigate_common::types::NotificationAccepted;

/// Default replay window for accepted responses (10 minutes).
pub const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 600;

/// Outcome of an idempotency lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyCheck {
    /// The request id was seen before; replay this response.
    Hit(NotificationAccepted),
    /// First time (or the stored record was unusable); process normally.
    Miss,
}

pub struct IdempotencyGuard {
    cache: Arc<dyn Cache>,
    ttl_secs: u64,
}

impl IdempotencyGuard {
    pub fn new(cache: Arc<dyn Cache>, ttl_secs: u64) -> Self {
        Self { cache, ttl_secs }
    }

    pub fn key(org_id: &str, request_id: &str) -> String {
        format!("idempotency:{}:{}", org_id, request_id)
    }

    pub async fn check(
        &self,
        org_id: &str,
        request_id: &str,
    ) -> Result<IdempotencyCheck, GatewayError> {
        let key = Self::key(org_id, request_id);
        let Some(stored) = self.cache.get(&key).await? else {
            return Ok(IdempotencyCheck::Miss);
        };

        match serde_json::from_str::<NotificationAccepted>(&stored) {
            Ok(response) => {
                tracing::info!(org_id, request_id, "Duplicate request detected");
                Ok(IdempotencyCheck::Hit(response))
            }
            Err(e) => {
                tracing::warn!(
                    org_id,
                    request_id,
                    error = %e,
                    "Discarding corrupt idempotency record"
                );
                if let Err(e) = self.cache.del(&key).await {
                    tracing::warn!(
                        org_id,
                        request_id,
                        error = %e,
                        "Failed to evict corrupt idempotency record"
                    );
                }
                Ok(IdempotencyCheck::Miss)
            }
        }
    }

    /// Remember the response returned for this request id.
    pub async fn commit(
        &self,
        org_id: &str,
        request_id: &str,
        response: &NotificationAccepted,
    ) -> Result<(), GatewayError> {
        let payload = serde_json::to_string(response)
            .map_err(|e| GatewayError::Internal(format!("encode idempotency record: {}", e)))?;
        self.cache
            .set_ex(&Self::key(org_id, request_id), &payload, self.ttl_secs)
            .await?;
        Ok(())
    }
}
