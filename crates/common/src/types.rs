use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery channel of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum NotificationType {
    Email,
    Push,
}

impl NotificationType {
    pub const ALL: [NotificationType; 2] = [NotificationType::Email, NotificationType::Push];

    /// Parse the wire name (`"email"` / `"push"`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "email" => Some(NotificationType::Email),
            "push" => Some(NotificationType::Push),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Email => "email",
            NotificationType::Push => "push",
        }
    }

    /// Queue name and direct-exchange routing key, e.g. `email.queue`.
    pub fn routing_key(&self) -> String {
        format!("{}.queue", self.as_str())
    }

    /// Salvage queue name and dead-letter routing key, e.g. `dl.email.queue`.
    pub fn dead_letter_routing_key(&self) -> String {
        format!("dl.{}", self.routing_key())
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a notification.
///
/// `queued → processing → {delivered, failed, bounced, rejected}`; the four
/// right-hand states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum NotificationStatus {
    Queued,
    Processing,
    Delivered,
    Failed,
    Bounced,
    Rejected,
}

impl NotificationStatus {
    /// Wire names accepted from workers, in lifecycle order.
    pub const VALID: &[&str] = &[
        "queued",
        "processing",
        "delivered",
        "failed",
        "bounced",
        "rejected",
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(NotificationStatus::Queued),
            "processing" => Some(NotificationStatus::Processing),
            "delivered" => Some(NotificationStatus::Delivered),
            "failed" => Some(NotificationStatus::Failed),
            "bounced" => Some(NotificationStatus::Bounced),
            "rejected" => Some(NotificationStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationStatus::Delivered
                | NotificationStatus::Failed
                | NotificationStatus::Bounced
                | NotificationStatus::Rejected
        )
    }

    /// Terminal outcomes other than a successful delivery.
    pub fn is_failure(&self) -> bool {
        self.is_terminal() && *self != NotificationStatus::Delivered
    }

    /// Whether moving from `self` to `next` is a legal forward step.
    ///
    /// Re-applying the current non-terminal state is allowed; anything out of
    /// a terminal state is not (same-status duplicates are handled by the
    /// caller before this check).
    pub fn can_transition_to(&self, next: NotificationStatus) -> bool {
        match self {
            NotificationStatus::Queued => true,
            NotificationStatus::Processing => next != NotificationStatus::Queued,
            _ => false,
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Queued => write!(f, "queued"),
            NotificationStatus::Processing => write!(f, "processing"),
            NotificationStatus::Delivered => write!(f, "delivered"),
            NotificationStatus::Failed => write!(f, "failed"),
            NotificationStatus::Bounced => write!(f, "bounced"),
            NotificationStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// An authenticated tenant, as resolved from its API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Organization {
    pub id: String,
    pub name: String,
    /// Max notifications per rolling day
    pub quota_limit: i64,
    pub is_active: bool,
}

/// A notification record as stored by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub correlation_id: String,
    pub organization_id: String,
    pub user_id: String,
    pub notification_type: NotificationType,
    pub template_code: String,
    pub priority: i32,
    pub request_id: String,
    pub status: NotificationStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Error prefix on records that failed before reaching the broker.
///
/// Such a record never produced a message, so a retry with the same request
/// id takes it over instead of being rejected as a duplicate.
pub const UNDISPATCHED_PREFIX: &str = "undispatched: ";

impl Notification {
    /// Whether this record failed at publish time and can be reclaimed.
    pub fn is_undispatched(&self) -> bool {
        self.status == NotificationStatus::Failed
            && self
                .error_message
                .as_deref()
                .is_some_and(|e| e.starts_with(UNDISPATCHED_PREFIX))
    }
}

/// Fields needed to insert a fresh notification in the `queued` state.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub id: Uuid,
    pub correlation_id: String,
    pub organization_id: String,
    pub user_id: String,
    pub notification_type: NotificationType,
    pub template_code: String,
    pub priority: i32,
    pub request_id: String,
}

/// A status mutation applied by the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub status: NotificationStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Per-user delivery preferences. A missing flag means opted in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub email: Option<bool>,
    #[serde(default)]
    pub push: Option<bool>,
}

impl UserPreferences {
    pub fn allows(&self, notification_type: NotificationType) -> bool {
        match notification_type {
            NotificationType::Email => self.email.unwrap_or(true),
            NotificationType::Push => self.push.unwrap_or(true),
        }
    }
}

/// User projection returned by the user directory service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default)]
    pub preferences: UserPreferences,
}

/// Template projection returned by the template store service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateData {
    pub code: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub subject: String,
    /// Variable names the template requires, in declaration order
    #[serde(default)]
    pub variables: Vec<String>,
}

/// Response returned when a notification is accepted (and replayed on retry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAccepted {
    pub notification_id: Uuid,
    pub status: String,
    pub request_id: String,
    pub correlation_id: String,
}

/// Fully resolved message handed to delivery workers through the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub notification_id: Uuid,
    pub correlation_id: String,
    pub organization_id: String,
    pub user_id: String,
    pub notification_type: NotificationType,
    pub template_code: String,
    pub template_content: String,
    pub template_subject: String,
    pub template_variables: Vec<String>,
    pub variables: HashMap<String, String>,
    pub priority: u8,
    pub metadata: serde_json::Value,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    pub push_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub request_id: String,
}
