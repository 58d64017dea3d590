//! Worker callbacks.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use notigate_common::error::GatewayError;
use notigate_common::types::{NotificationStatus, NotificationType};
use notigate_engine::reconciler::{ReconcileOutcome, StatusReport};

use crate::middleware::auth::InternalCaller;
use crate::routes::invalid_body;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/internal/{notification_type}/status",
        post(update_status),
    )
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub notification_id: String,
    pub organization_id: String,
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusUpdate {
    fn into_report(self, notification_type: &str) -> Result<StatusReport, GatewayError> {
        let notification_type = NotificationType::parse(notification_type).ok_or_else(|| {
            GatewayError::Validation(format!(
                "Invalid notification type '{}': expected email or push",
                notification_type
            ))
        })?;
        let notification_id = Uuid::parse_str(self.notification_id.trim()).map_err(|_| {
            GatewayError::Validation(format!(
                "Invalid notification_id '{}'",
                self.notification_id
            ))
        })?;
        if self.organization_id.trim().is_empty() {
            return Err(GatewayError::Validation(
                "organization_id is required".to_string(),
            ));
        }
        let status = NotificationStatus::parse(&self.status).ok_or_else(|| {
            GatewayError::Validation(format!(
                "Invalid status '{}'. Must be one of: {}",
                self.status,
                NotificationStatus::VALID.join(", ")
            ))
        })?;

        Ok(StatusReport {
            notification_id,
            organization_id: self.organization_id,
            notification_type,
            status,
            timestamp: self.timestamp,
            error: self.error,
        })
    }
}

/// POST /internal/{notification_type}/status: Apply a worker's delivery report.
async fn update_status(
    State(state): State<AppState>,
    _caller: InternalCaller,
    Path(notification_type): Path<String>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let Json(update) = payload.map_err(invalid_body)?;
    let report = update.into_report(&notification_type)?;

    let outcome = state.reconciler.reconcile(&report).await?;
    let body = match outcome {
        ReconcileOutcome::Applied { from, to } => json!({
            "success": true,
            "notification_id": report.notification_id,
            "previous_status": from,
            "status": to,
            "message": format!("Status updated to {}", to),
        }),
        ReconcileOutcome::Duplicate => json!({
            "success": true,
            "notification_id": report.notification_id,
            "status": report.status,
            "message": format!("Notification already {}", report.status),
        }),
    };
    Ok(Json(body))
}
