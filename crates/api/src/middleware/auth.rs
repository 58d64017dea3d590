//! Caller authentication extractors.
//!
//! - `AuthOrganization` resolves the `X-API-Key` header to an active
//!   organization, through a short-lived `authkey:<sha256>` cache entry.
//! - `InternalCaller` checks the `X-Internal-Secret` header used by workers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use notigate_common::error::GatewayError;
use notigate_common::types::Organization;

use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";

const INVALID_API_KEY: &str = "Missing or invalid API key";

/// Hex-encoded SHA-256 of an API key; raw keys never reach the cache.
pub fn hash_api_key(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

pub fn auth_cache_key(api_key: &str) -> String {
    format!("authkey:{}", hash_api_key(api_key))
}

/// Compares two byte slices in constant time.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Organization authenticated by its API key.
///
/// ```ignore
/// async fn handler(AuthOrganization(org): AuthOrganization) -> impl IntoResponse {
///     // org.id is the caller's organization
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthOrganization(pub Organization);

impl FromRequestParts<AppState> for AuthOrganization {
    type Rejection = GatewayError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let cache = state.cache.clone();
        let organizations = state.organizations.clone();
        let ttl_secs = state.config.auth_cache_ttl_secs;

        let api_key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        async move {
            let api_key = api_key.ok_or_else(|| GatewayError::Auth(INVALID_API_KEY.to_string()))?;
            let key = auth_cache_key(&api_key);

            match cache.get(&key).await {
                Ok(Some(raw)) => match serde_json::from_str::<Organization>(&raw) {
                    Ok(org) => return Ok(AuthOrganization(org)),
                    Err(e) => tracing::warn!(error = %e, "Discarding unreadable auth cache entry"),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Auth cache read failed"),
            }

            let org = organizations
                .find_active_by_api_key(&api_key)
                .await?
                .ok_or_else(|| GatewayError::Auth(INVALID_API_KEY.to_string()))?;

            match serde_json::to_string(&org) {
                Ok(encoded) => {
                    if let Err(e) = cache.set_ex(&key, &encoded, ttl_secs).await {
                        tracing::warn!(error = %e, "Auth cache write failed");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Could not encode auth cache entry"),
            }

            tracing::debug!(org_id = %org.id, "Organization authenticated");
            Ok(AuthOrganization(org))
        }
    }
}

/// A worker or peer service presenting the shared internal secret.
#[derive(Debug, Clone, Copy)]
pub struct InternalCaller;

impl FromRequestParts<AppState> for InternalCaller {
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(INTERNAL_SECRET_HEADER)
            .map(|v| v.as_bytes())
            .unwrap_or_default();

        let expected = state.config.internal_api_secret.as_bytes();
        if !expected.is_empty() && constant_time_eq(presented, expected) {
            Ok(InternalCaller)
        } else {
            tracing::warn!("Rejected internal call with invalid secret");
            Err(GatewayError::Auth("Invalid internal secret".to_string()))
        }
    }
}
