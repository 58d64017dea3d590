//! Status reconciler: applies worker delivery reports to notifications and
//! settles the quota ledger exactly once per notification.
//!
//! The record update is a compare-and-set on the previously observed status,
//! and only the report whose update wins performs the settlement. Repeated
//! reports with the same terminal outcome are acknowledged without effect.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use notigate_common::error::GatewayError;
use notigate_common::types::{NotificationStatus, NotificationType, StatusChange};

use crate::admission::{AdmissionController, Settlement};
use crate::store::NotificationStore;

/// Longest error message stored on a notification, in characters.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// How many times a report is re-evaluated when it races another writer.
const MAX_ATTEMPTS: usize = 3;

/// A delivery report from a worker.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub notification_id: Uuid,
    pub organization_id: String,
    /// Channel named by the reporting worker's callback route.
    pub notification_type: NotificationType,
    pub status: NotificationStatus,
    pub timestamp: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied {
        from: NotificationStatus,
        to: NotificationStatus,
    },
    /// Already in this terminal state; nothing changed.
    Duplicate,
}

pub struct StatusReconciler {
    store: Arc<dyn NotificationStore>,
    admission: Arc<AdmissionController>,
}

impl StatusReconciler {
    pub fn new(store: Arc<dyn NotificationStore>, admission: Arc<AdmissionController>) -> Self {
        Self { store, admission }
    }

    pub async fn reconcile(&self, report: &StatusReport) -> Result<ReconcileOutcome, GatewayError> {
        let change = StatusChange {
            status: report.status,
            delivered_at: report.timestamp.as_deref().and_then(parse_timestamp),
            error_message: report.error.as_deref().map(truncate_error),
        };

        for _ in 0..MAX_ATTEMPTS {
            let current = self
                .store
                .find(report.notification_id)
                .await?
                .ok_or_else(|| {
                    GatewayError::NotFound(format!(
                        "Notification {} not found",
                        report.notification_id
                    ))
                })?;

            if current.organization_id != report.organization_id {
                tracing::warn!(
                    notification_id = %report.notification_id,
                    reported_org = %report.organization_id,
                    "Status report organization does not match notification"
                );
                return Err(GatewayError::Validation(
                    "organization_id does not match the notification".to_string(),
                ));
            }

            if current.notification_type != report.notification_type {
                tracing::warn!(
                    notification_id = %report.notification_id,
                    stored = %current.notification_type,
                    reported = %report.notification_type,
                    "Status report channel does not match notification"
                );
                return Err(GatewayError::Validation(format!(
                    "notification {} is not a {} notification",
                    report.notification_id, report.notification_type
                )));
            }

            if current.status.is_terminal() && current.status == report.status {
                tracing::info!(
                    notification_id = %report.notification_id,
                    status = %current.status,
                    "Duplicate status update ignored"
                );
                return Ok(ReconcileOutcome::Duplicate);
            }

            if !current.status.can_transition_to(report.status) {
                tracing::warn!(
                    notification_id = %report.notification_id,
                    from = %current.status,
                    to = %report.status,
                    "Rejected status transition"
                );
                return Err(GatewayError::InvalidTransition {
                    from: current.status,
                    to: report.status,
                });
            }

            let Some(updated) = self
                .store
                .transition(report.notification_id, current.status, &change)
                .await?
            else {
                tracing::debug!(
                    notification_id = %report.notification_id,
                    "Notification changed concurrently, re-evaluating report"
                );
                continue;
            };

            self.settle(&updated.organization_id, current.status, report.status)
                .await?;

            tracing::info!(
                notification_id = %report.notification_id,
                from = %current.status,
                to = %report.status,
                "Status updated"
            );
            return Ok(ReconcileOutcome::Applied {
                from: current.status,
                to: report.status,
            });
        }

        Err(GatewayError::Internal(format!(
            "notification {} kept changing during reconciliation",
            report.notification_id
        )))
    }

    async fn settle(
        &self,
        org_id: &str,
        from: NotificationStatus,
        to: NotificationStatus,
    ) -> Result<(), GatewayError> {
        let settlement = match to {
            NotificationStatus::Delivered => Settlement::Delivered,
            status if status.is_failure() => Settlement::Failed,
            _ => return Ok(()),
        };

        if let Err(e) = self.admission.settle(org_id, settlement).await {
            // The status is already persisted; the pending slot ages out with its key.
            tracing::error!(
                org_id,
                %from,
                %to,
                error = %e,
                "Quota settlement failed after status update"
            );
            return Err(e);
        }
        Ok(())
    }
}

/// Parse a worker timestamp; RFC 3339, or a naive ISO-8601 time taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    tracing::warn!(timestamp = raw, "Invalid timestamp format, ignoring");
    None
}

pub fn truncate_error(error: &str) -> String {
    error.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}
