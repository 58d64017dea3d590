//! In-process stores with the same contracts as the PostgreSQL ones.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use notigate_common::error::GatewayError;
use notigate_common::types::{
    NewNotification, Notification, NotificationStatus, Organization, StatusChange,
};

use crate::store::{NotificationStore, OrganizationStore};

#[derive(Debug, Default)]
pub struct MemoryNotificationStore {
    records: RwLock<HashMap<Uuid, Notification>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Notification> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(&self, new: &NewNotification) -> Result<Notification, GatewayError> {
        let mut records = self.records.write().await;
        let now = Utc::now();

        let existing = records.values_mut().find(|n| {
            n.organization_id == new.organization_id && n.request_id == new.request_id
        });
        if let Some(record) = existing {
            if !record.is_undispatched() {
                return Err(GatewayError::DuplicateRequest(new.request_id.clone()));
            }
            record.correlation_id = new.correlation_id.clone();
            record.user_id = new.user_id.clone();
            record.notification_type = new.notification_type;
            record.template_code = new.template_code.clone();
            record.priority = new.priority;
            record.status = NotificationStatus::Queued;
            record.error_message = None;
            record.updated_at = now;
            return Ok(record.clone());
        }

        let notification = Notification {
            id: new.id,
            correlation_id: new.correlation_id.clone(),
            organization_id: new.organization_id.clone(),
            user_id: new.user_id.clone(),
            notification_type: new.notification_type,
            template_code: new.template_code.clone(),
            priority: new.priority,
            request_id: new.request_id.clone(),
            status: NotificationStatus::Queued,
            error_message: None,
            created_at: now,
            updated_at: now,
            delivered_at: None,
        };
        records.insert(notification.id, notification.clone());
        Ok(notification)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Notification>, GatewayError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_for_org(
        &self,
        id: Uuid,
        org_id: &str,
    ) -> Result<Option<Notification>, GatewayError> {
        Ok(self
            .records
            .read()
            .await
            .get(&id)
            .filter(|n| n.organization_id == org_id)
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: NotificationStatus,
        change: &StatusChange,
    ) -> Result<Option<Notification>, GatewayError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(None);
        };
        if record.status != expected {
            return Ok(None);
        }

        record.status = change.status;
        if change.delivered_at.is_some() {
            record.delivered_at = change.delivered_at;
        }
        if change.error_message.is_some() {
            record.error_message = change.error_message.clone();
        }
        record.updated_at = Utc::now();
        Ok(Some(record.clone()))
    }
}

/// Organizations keyed by API key.
#[derive(Debug, Default)]
pub struct MemoryOrganizationStore {
    by_api_key: RwLock<HashMap<String, Organization>>,
}

impl MemoryOrganizationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, api_key: &str, org: Organization) {
        self.by_api_key
            .write()
            .await
            .insert(api_key.to_string(), org);
    }
}

#[async_trait]
impl OrganizationStore for MemoryOrganizationStore {
    async fn find_active_by_api_key(
        &self,
        api_key: &str,
    ) -> Result<Option<Organization>, GatewayError> {
        Ok(self
            .by_api_key
            .read()
            .await
            .get(api_key)
            .filter(|org| org.is_active)
            .cloned())
    }
}
