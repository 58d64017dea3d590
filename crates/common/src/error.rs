use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::cache::CacheError;
use crate::types::{NotificationStatus, NotificationType};

/// Error taxonomy of the gateway, mapped onto HTTP responses at the edge.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing required template variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("User has disabled {0} notifications")]
    OptedOut(NotificationType),

    #[error("User does not have a push token registered")]
    NoPushToken,

    #[error("Rate limit exceeded: max {limit} requests per minute")]
    RateLimited { limit: u64 },

    #[error("Quota exceeded: your notification quota of {limit} has been exhausted")]
    QuotaExceeded { limit: i64 },

    #[error("Request {0} is already being processed")]
    DuplicateRequest(String),

    #[error("Cannot move notification from {from} to {to}")]
    InvalidTransition {
        from: NotificationStatus,
        to: NotificationStatus,
    },

    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable identifier for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Database(_) | GatewayError::Cache(_) | GatewayError::Internal(_) => {
                "internal_error"
            }
            GatewayError::Auth(_) => "authentication_failed",
            GatewayError::Validation(_) => "validation_error",
            GatewayError::MissingVariables(_) => "missing_template_variables",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::OptedOut(_) => "opted_out",
            GatewayError::NoPushToken => "no_push_token",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::QuotaExceeded { .. } => "quota_exceeded",
            GatewayError::DuplicateRequest(_) => "duplicate_request",
            GatewayError::InvalidTransition { .. } => "invalid_transition",
            GatewayError::Upstream(_) => "upstream_unavailable",
            GatewayError::Dispatch(_) => "dispatch_failed",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Database(_) | GatewayError::Cache(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Validation(_)
            | GatewayError::MissingVariables(_)
            | GatewayError::NoPushToken => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::OptedOut(_) => StatusCode::FORBIDDEN,
            GatewayError::RateLimited { .. } | GatewayError::QuotaExceeded { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            GatewayError::DuplicateRequest(_) | GatewayError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Dispatch(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            // Backend details stay in the logs
            GatewayError::Database(_) | GatewayError::Cache(_) | GatewayError::Internal(_) => {
                tracing::error!(error = %self, "Request failed with internal error");
                "An unexpected error occurred".to_string()
            }
            GatewayError::Auth(msg) => msg.clone(),
            GatewayError::Validation(msg) | GatewayError::NotFound(msg) => msg.clone(),
            _ => self.to_string(),
        };

        let body = match &self {
            GatewayError::MissingVariables(missing) => json!({
                "error": message,
                "code": self.code(),
                "missing_variables": missing,
            }),
            _ => json!({ "error": message, "code": self.code() }),
        };
        (status, Json(body)).into_response()
    }
}
