//! Admission-and-dispatch pipeline for new notifications.
//!
//! Stages run in a fixed order and stop at the first rejection:
//!
//! 1. idempotency lookup (a hit replays the stored response)
//! 2. rate gate
//! 3. user + template enrichment, fetched concurrently
//! 4. template variables, opt-out and push token checks
//! 5. quota reservation
//! 6. record insert, broker publish, idempotency commit
//!
//! Nothing is reserved before step 5, so rejections in steps 1-4 leave the
//! quota ledger untouched. A failure after the reservation releases it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use notigate_common::error::GatewayError;
use notigate_common::types::{
    DispatchMessage, NewNotification, Notification, NotificationAccepted, NotificationStatus,
    NotificationType, Organization, StatusChange, UNDISPATCHED_PREFIX,
};
use notigate_dispatch::Publisher;

use crate::admission::AdmissionController;
use crate::enrichment::{EnrichmentClient, RequestContext, check_deliverable, missing_variables};
use crate::idempotency::{IdempotencyCheck, IdempotencyGuard};
use crate::reconciler::truncate_error;
use crate::store::NotificationStore;

pub const DEFAULT_PRIORITY: i64 = 5;
pub const MIN_PRIORITY: i64 = 1;
pub const MAX_PRIORITY: i64 = 10;

/// Body of a create-notification request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateNotificationParams {
    pub notification_type: String,
    pub user_id: String,
    #[serde(default)]
    pub template_code: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// A create request after boundary validation.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub notification_type: NotificationType,
    pub user_id: String,
    pub template_code: String,
    pub variables: HashMap<String, String>,
    pub request_id: String,
    pub priority: u8,
    pub metadata: serde_json::Value,
}

impl CreateNotificationParams {
    pub fn validate(self) -> Result<ValidatedRequest, GatewayError> {
        let notification_type = NotificationType::parse(&self.notification_type).ok_or_else(|| {
            GatewayError::Validation(format!(
                "Invalid notification_type '{}': expected email or push",
                self.notification_type
            ))
        })?;

        if self.user_id.trim().is_empty() {
            return Err(GatewayError::Validation("user_id is required".to_string()));
        }
        if self.template_code.trim().is_empty() {
            return Err(GatewayError::Validation(
                "template_code is required".to_string(),
            ));
        }

        let priority = self.priority.unwrap_or(DEFAULT_PRIORITY);
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(GatewayError::Validation(format!(
                "priority must be between {} and {}",
                MIN_PRIORITY, MAX_PRIORITY
            )));
        }

        let request_id = match self.request_id {
            Some(id) if id.trim().is_empty() => {
                return Err(GatewayError::Validation(
                    "request_id must not be empty".to_string(),
                ));
            }
            Some(id) => id,
            None => Uuid::new_v4().simple().to_string(),
        };

        Ok(ValidatedRequest {
            notification_type,
            user_id: self.user_id,
            template_code: self.template_code,
            variables: self.variables,
            request_id,
            priority: priority as u8,
            metadata: self.metadata.unwrap_or_else(|| serde_json::json!({})),
        })
    }
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Newly admitted and queued.
    Accepted(NotificationAccepted),
    /// The request id was seen before; this is the original response.
    Replayed(NotificationAccepted),
}

impl Submission {
    pub fn response(&self) -> &NotificationAccepted {
        match self {
            Submission::Accepted(r) | Submission::Replayed(r) => r,
        }
    }

    pub fn into_inner(self) -> NotificationAccepted {
        match self {
            Submission::Accepted(r) | Submission::Replayed(r) => r,
        }
    }
}

pub struct NotificationPipeline {
    guard: IdempotencyGuard,
    admission: Arc<AdmissionController>,
    enrichment: EnrichmentClient,
    store: Arc<dyn NotificationStore>,
    publisher: Arc<dyn Publisher>,
}

impl NotificationPipeline {
    pub fn new(
        guard: IdempotencyGuard,
        admission: Arc<AdmissionController>,
        enrichment: EnrichmentClient,
        store: Arc<dyn NotificationStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            guard,
            admission,
            enrichment,
            store,
            publisher,
        }
    }

    pub async fn submit(
        &self,
        org: &Organization,
        params: CreateNotificationParams,
        correlation_id: &str,
    ) -> Result<Submission, GatewayError> {
        let request = params.validate()?;

        if let IdempotencyCheck::Hit(previous) =
            self.guard.check(&org.id, &request.request_id).await?
        {
            return Ok(Submission::Replayed(previous));
        }

        self.admission.check_rate(&org.id).await?;

        let ctx = RequestContext {
            org_id: org.id.clone(),
            correlation_id: correlation_id.to_string(),
        };
        let (user, template) = self
            .enrichment
            .enrich(&request.user_id, &request.template_code, &ctx)
            .await;
        let user = user?;
        let template = template?;

        let missing = missing_variables(&template, &request.variables);
        if !missing.is_empty() {
            return Err(GatewayError::MissingVariables(missing));
        }
        check_deliverable(&user, request.notification_type)?;

        self.admission.reserve(org).await?;

        let new = NewNotification {
            id: Uuid::new_v4(),
            correlation_id: correlation_id.to_string(),
            organization_id: org.id.clone(),
            user_id: request.user_id.clone(),
            notification_type: request.notification_type,
            template_code: request.template_code.clone(),
            priority: i32::from(request.priority),
            request_id: request.request_id.clone(),
        };
        let notification = match self.store.create(&new).await {
            Ok(notification) => notification,
            Err(e) => {
                self.release_reservation(&org.id).await;
                return Err(e);
            }
        };

        let message = DispatchMessage {
            notification_id: notification.id,
            correlation_id: correlation_id.to_string(),
            organization_id: org.id.clone(),
            user_id: request.user_id,
            notification_type: request.notification_type,
            template_code: request.template_code,
            template_content: template.content,
            template_subject: template.subject,
            template_variables: template.variables,
            variables: request.variables,
            priority: request.priority,
            metadata: request.metadata,
            user_email: user.email,
            user_name: user.name,
            push_token: user.push_token,
            created_at: Utc::now(),
            request_id: request.request_id.clone(),
        };

        let routing_key = request.notification_type.routing_key();
        if let Err(e) = self
            .publisher
            .publish(&routing_key, &message, request.priority, correlation_id)
            .await
        {
            tracing::error!(
                notification_id = %notification.id,
                org_id = %org.id,
                routing_key = %routing_key,
                error = %e,
                "Failed to publish notification"
            );
            self.abandon(&notification, &e.to_string()).await;
            return Err(GatewayError::Dispatch(e.to_string()));
        }

        let response = NotificationAccepted {
            notification_id: notification.id,
            status: "accepted".to_string(),
            request_id: request.request_id,
            correlation_id: correlation_id.to_string(),
        };

        // The message is already queued; a lost record only weakens replay
        if let Err(e) = self.guard.commit(&org.id, &response.request_id, &response).await {
            tracing::warn!(
                notification_id = %notification.id,
                request_id = %response.request_id,
                error = %e,
                "Failed to store idempotency record"
            );
        }

        tracing::info!(
            notification_id = %notification.id,
            org_id = %org.id,
            notification_type = %notification.notification_type,
            priority = notification.priority,
            "Notification queued"
        );
        Ok(Submission::Accepted(response))
    }

    /// Look up a notification owned by `org_id`.
    pub async fn status(
        &self,
        org_id: &str,
        notification_id: &str,
    ) -> Result<Notification, GatewayError> {
        let not_found =
            || GatewayError::NotFound(format!("Notification {} not found", notification_id));
        let id = Uuid::parse_str(notification_id).map_err(|_| not_found())?;
        self.store
            .find_for_org(id, org_id)
            .await?
            .ok_or_else(not_found)
    }

    /// Undo a reservation whose message never reached the broker.
    ///
    /// The record is marked failed as undispatched, so a retry under the same
    /// request id reclaims it.
    async fn abandon(&self, notification: &Notification, reason: &str) {
        self.release_reservation(&notification.organization_id)
            .await;

        let change = StatusChange {
            status: NotificationStatus::Failed,
            delivered_at: None,
            error_message: Some(truncate_error(&format!("{UNDISPATCHED_PREFIX}{reason}"))),
        };
        match self
            .store
            .transition(notification.id, NotificationStatus::Queued, &change)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!(
                notification_id = %notification.id,
                "Notification left queued state before it could be marked failed"
            ),
            Err(e) => tracing::error!(
                notification_id = %notification.id,
                error = %e,
                "Failed to mark undispatched notification as failed"
            ),
        }
    }

    async fn release_reservation(&self, org_id: &str) {
        if let Err(e) = self.admission.release(org_id).await {
            tracing::error!(org_id, error = %e, "Failed to release quota reservation");
        }
    }
}
