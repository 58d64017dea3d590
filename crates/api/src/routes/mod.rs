pub mod health;
pub mod internal;
pub mod notifications;

use axum::Router;
use axum::extract::rejection::JsonRejection;

use notigate_common::error::GatewayError;

use crate::middleware::correlation::correlation_id;
use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(notifications::router())
        .merge(internal::router())
        .layer(axum::middleware::from_fn(correlation_id))
        .with_state(state)
}

/// Malformed or incomplete JSON bodies surface as validation errors.
pub(crate) fn invalid_body(rejection: JsonRejection) -> GatewayError {
    GatewayError::Validation(rejection.body_text())
}
