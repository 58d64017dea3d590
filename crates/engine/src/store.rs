//! Persistence collaborators: notification records and organizations.
//!
//! The core only needs create / read / conditional update on notifications
//! and an API-key lookup on organizations. PostgreSQL implementations live
//! here; in-process ones are in [`crate::memory`].

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use notigate_common::error::GatewayError;
use notigate_common::types::{
    NewNotification, Notification, NotificationStatus, Organization, StatusChange,
    UNDISPATCHED_PREFIX,
};

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert a new notification in the `queued` state.
    ///
    /// An existing record with the same organization and request id is reset
    /// to `queued` and returned (keeping its id) only when it never reached
    /// the broker; otherwise this fails with [`GatewayError::DuplicateRequest`].
    async fn create(&self, new: &NewNotification) -> Result<Notification, GatewayError>;

    async fn find(&self, id: Uuid) -> Result<Option<Notification>, GatewayError>;

    async fn find_for_org(
        &self,
        id: Uuid,
        org_id: &str,
    ) -> Result<Option<Notification>, GatewayError>;

    /// Apply `change` only if the stored status is still `expected`.
    ///
    /// Returns the updated record, or `None` if another writer got there first.
    async fn transition(
        &self,
        id: Uuid,
        expected: NotificationStatus,
        change: &StatusChange,
    ) -> Result<Option<Notification>, GatewayError>;
}

#[async_trait]
pub trait OrganizationStore: Send + Sync {
    /// Look up an active organization by its API key.
    async fn find_active_by_api_key(
        &self,
        api_key: &str,
    ) -> Result<Option<Organization>, GatewayError>;
}

/// Notification records in PostgreSQL.
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn create(&self, new: &NewNotification) -> Result<Notification, GatewayError> {
        let now = Utc::now();
        let result = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (
                id, correlation_id, organization_id, user_id, notification_type,
                template_code, priority, request_id, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            ON CONFLICT (organization_id, request_id) DO UPDATE
            SET correlation_id = EXCLUDED.correlation_id,
                user_id = EXCLUDED.user_id,
                notification_type = EXCLUDED.notification_type,
                template_code = EXCLUDED.template_code,
                priority = EXCLUDED.priority,
                status = EXCLUDED.status,
                error_message = NULL,
                updated_at = EXCLUDED.updated_at
            WHERE notifications.status = 'failed'
              AND notifications.error_message LIKE $11 || '%'
            RETURNING *
            "#,
        )
        .bind(new.id)
        .bind(&new.correlation_id)
        .bind(&new.organization_id)
        .bind(&new.user_id)
        .bind(new.notification_type.to_string())
        .bind(&new.template_code)
        .bind(new.priority)
        .bind(&new.request_id)
        .bind(NotificationStatus::Queued.to_string())
        .bind(now)
        .bind(UNDISPATCHED_PREFIX)
        .fetch_optional(&self.pool)
        .await;

        // No row back means the conflicting record is live
        match result {
            Ok(Some(notification)) => Ok(notification),
            Ok(None) => Err(GatewayError::DuplicateRequest(new.request_id.clone())),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(GatewayError::DuplicateRequest(new.request_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find(&self, id: Uuid) -> Result<Option<Notification>, GatewayError> {
        let notification = sqlx::query_as("SELECT * FROM notifications WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(notification)
    }

    async fn find_for_org(
        &self,
        id: Uuid,
        org_id: &str,
    ) -> Result<Option<Notification>, GatewayError> {
        let notification =
            sqlx::query_as("SELECT * FROM notifications WHERE id = $1 AND organization_id = $2")
                .bind(id)
                .bind(org_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(notification)
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: NotificationStatus,
        change: &StatusChange,
    ) -> Result<Option<Notification>, GatewayError> {
        let notification = sqlx::query_as(
            r#"
            UPDATE notifications
            SET status = $1,
                delivered_at = COALESCE($2, delivered_at),
                error_message = COALESCE($3, error_message),
                updated_at = NOW()
            WHERE id = $4 AND status = $5
            RETURNING *
            "#,
        )
        .bind(change.status.to_string())
        .bind(change.delivered_at)
        .bind(&change.error_message)
        .bind(id)
        .bind(expected.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(notification)
    }
}

/// Organizations in PostgreSQL (read-only from the gateway's point of view).
#[derive(Clone)]
pub struct PgOrganizationStore {
    pool: PgPool,
}

impl PgOrganizationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrganizationStore for PgOrganizationStore {
    async fn find_active_by_api_key(
        &self,
        api_key: &str,
    ) -> Result<Option<Organization>, GatewayError> {
        let org = sqlx::query_as(
            r#"
            SELECT id, name, quota_limit, is_active
            FROM organizations
            WHERE api_key = $1 AND is_active = true
            "#,
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(org)
    }
}
