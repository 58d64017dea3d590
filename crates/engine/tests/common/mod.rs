//! In-process harness shared by the engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use notigate_common::cache::{Cache, MemoryCache};
use notigate_common::types::{Organization, TemplateData, UserData, UserPreferences};
use notigate_dispatch::{MemoryPublisher, Publisher};
use notigate_engine::admission::AdmissionController;
use notigate_engine::enrichment::{
    EnrichmentClient, RequestContext, Upstream, UpstreamError,
};
use notigate_engine::idempotency::IdempotencyGuard;
use notigate_engine::memory::MemoryNotificationStore;
use notigate_engine::pipeline::{CreateNotificationParams, NotificationPipeline};
use notigate_engine::reconciler::StatusReconciler;
use notigate_engine::store::NotificationStore;

// ============================================================
// Stub upstream
// ============================================================

/// Canned users and templates, with call counters.
pub struct StubUpstream {
    users: HashMap<String, UserData>,
    templates: HashMap<String, TemplateData>,
    pub user_calls: AtomicUsize,
    pub template_calls: AtomicUsize,
}

impl StubUpstream {
    pub fn new() -> Self {
        let mut users = HashMap::new();
        users.insert("user-1".to_string(), user("user-1", None, UserPreferences::default()));
        users.insert(
            "user-2".to_string(),
            user("user-2", Some("device-token"), UserPreferences::default()),
        );
        users.insert(
            "user-3".to_string(),
            user(
                "user-3",
                None,
                UserPreferences {
                    email: Some(false),
                    push: None,
                },
            ),
        );

        let mut templates = HashMap::new();
        templates.insert(
            "welcome".to_string(),
            TemplateData {
                code: "welcome".to_string(),
                content: "Hello {{name}} from {{company}}".to_string(),
                subject: "Welcome".to_string(),
                variables: vec!["name".to_string(), "company".to_string()],
            },
        );

        Self {
            users,
            templates,
            user_calls: AtomicUsize::new(0),
            template_calls: AtomicUsize::new(0),
        }
    }

    pub fn user_calls(&self) -> usize {
        self.user_calls.load(Ordering::SeqCst)
    }
}

fn user(id: &str, push_token: Option<&str>, preferences: UserPreferences) -> UserData {
    UserData {
        id: id.to_string(),
        email: Some(format!("{}@example.com", id)),
        name: Some("Ada".to_string()),
        push_token: push_token.map(str::to_string),
        preferences,
    }
}

#[async_trait]
impl Upstream for StubUpstream {
    async fn get_user(
        &self,
        user_id: &str,
        _ctx: &RequestContext,
    ) -> Result<UserData, UpstreamError> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        self.users
            .get(user_id)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound {
                entity: "User",
                id: user_id.to_string(),
            })
    }

    async fn get_template(
        &self,
        code: &str,
        _language: &str,
        _ctx: &RequestContext,
    ) -> Result<TemplateData, UpstreamError> {
        self.template_calls.fetch_add(1, Ordering::SeqCst);
        self.templates
            .get(code)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound {
                entity: "Template",
                id: code.to_string(),
            })
    }
}

// ============================================================
// Harness
// ============================================================

pub struct Harness {
    pub cache: Arc<MemoryCache>,
    pub store: Arc<MemoryNotificationStore>,
    pub publisher: Arc<MemoryPublisher>,
    pub upstream: Arc<StubUpstream>,
    pub admission: Arc<AdmissionController>,
    pub pipeline: NotificationPipeline,
    pub reconciler: StatusReconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_rate_limit(100)
    }

    pub fn with_rate_limit(rate_limit: u64) -> Self {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryNotificationStore::new());
        let publisher = Arc::new(MemoryPublisher::new());
        let upstream = Arc::new(StubUpstream::new());

        let shared_cache: Arc<dyn Cache> = cache.clone();
        let shared_store: Arc<dyn NotificationStore> = store.clone();
        let shared_publisher: Arc<dyn Publisher> = publisher.clone();
        let shared_upstream: Arc<dyn Upstream> = upstream.clone();

        let admission = Arc::new(AdmissionController::new(shared_cache.clone(), rate_limit));
        let pipeline = NotificationPipeline::new(
            IdempotencyGuard::new(shared_cache.clone(), 600),
            admission.clone(),
            EnrichmentClient::new(shared_cache, shared_upstream, 600, 300),
            shared_store.clone(),
            shared_publisher,
        );
        let reconciler = StatusReconciler::new(shared_store, admission.clone());

        Self {
            cache,
            store,
            publisher,
            upstream,
            admission,
            pipeline,
            reconciler,
        }
    }
}

pub fn org(quota_limit: i64) -> Organization {
    Organization {
        id: "org-1".to_string(),
        name: "Acme".to_string(),
        quota_limit,
        is_active: true,
    }
}

/// A valid email request for `user-1` with the `welcome` template.
pub fn email_request(request_id: Option<&str>) -> CreateNotificationParams {
    let mut variables = HashMap::new();
    variables.insert("name".to_string(), "Ada".to_string());
    variables.insert("company".to_string(), "Acme".to_string());

    CreateNotificationParams {
        notification_type: "email".to_string(),
        user_id: "user-1".to_string(),
        template_code: "welcome".to_string(),
        variables,
        request_id: request_id.map(str::to_string),
        priority: None,
        metadata: None,
    }
}
