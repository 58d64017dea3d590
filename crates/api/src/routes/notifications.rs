//! Organization-facing notification routes.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use notigate_common::error::GatewayError;
use notigate_common::types::{
    Notification, NotificationAccepted, NotificationStatus, NotificationType,
};
use notigate_engine::pipeline::{CreateNotificationParams, Submission};

use crate::middleware::auth::AuthOrganization;
use crate::middleware::correlation::CorrelationId;
use crate::routes::invalid_body;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/notifications", post(create_notification))
        .route("/api/v1/notifications/status", post(notification_status))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    #[serde(default)]
    pub notification_id: String,
}

/// Projection of a notification returned to its organization.
#[derive(Debug, Serialize)]
pub struct NotificationView {
    pub notification_id: Uuid,
    pub status: NotificationStatus,
    pub notification_type: NotificationType,
    pub template_code: String,
    pub priority: i32,
    pub request_id: String,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl From<Notification> for NotificationView {
    fn from(n: Notification) -> Self {
        Self {
            notification_id: n.id,
            status: n.status,
            notification_type: n.notification_type,
            template_code: n.template_code,
            priority: n.priority,
            request_id: n.request_id,
            correlation_id: n.correlation_id,
            created_at: n.created_at,
            updated_at: n.updated_at,
            delivered_at: n.delivered_at,
            error_message: n.error_message,
        }
    }
}

/// POST /api/v1/notifications: Admit a notification and queue it for delivery.
///
/// `202` when newly accepted, `200` with the original body on replay.
async fn create_notification(
    State(state): State<AppState>,
    AuthOrganization(org): AuthOrganization,
    correlation: CorrelationId,
    payload: Result<Json<CreateNotificationParams>, JsonRejection>,
) -> Result<(StatusCode, Json<NotificationAccepted>), GatewayError> {
    let Json(params) = payload.map_err(invalid_body)?;

    let submission = state
        .pipeline
        .submit(&org, params, correlation.as_str())
        .await?;

    let status = match submission {
        Submission::Accepted(_) => StatusCode::ACCEPTED,
        Submission::Replayed(_) => StatusCode::OK,
    };
    Ok((status, Json(submission.into_inner())))
}

/// POST /api/v1/notifications/status: Look up one of the caller's notifications.
async fn notification_status(
    State(state): State<AppState>,
    AuthOrganization(org): AuthOrganization,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<NotificationView>, GatewayError> {
    let Json(request) = payload.map_err(invalid_body)?;
    if request.notification_id.trim().is_empty() {
        return Err(GatewayError::Validation(
            "notification_id is required".to_string(),
        ));
    }

    let notification = state
        .pipeline
        .status(&org.id, request.notification_id.trim())
        .await?;
    Ok(Json(notification.into()))
}
