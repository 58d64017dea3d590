//! Health check endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// GET /health: 200 when the cache and broker respond, 503 otherwise.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let (cache, broker) = tokio::join!(state.cache.ping(), state.publisher.is_healthy());

    let cache_ok = match cache {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Health check: cache unavailable");
            false
        }
    };
    if !broker {
        tracing::warn!("Health check: broker unavailable");
    }

    let healthy = cache_ok && broker;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let check = |ok: bool| if ok { "ok" } else { "unavailable" };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "service": "notigate-api",
            "version": env!("CARGO_PKG_VERSION"),
            "checks": {
                "cache": check(cache_ok),
                "broker": check(broker),
            }
        })),
    )
}
