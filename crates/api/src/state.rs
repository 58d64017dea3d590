//! Shared application state for the Axum API server.

use std::sync::Arc;

use notigate_common::cache::Cache;
use notigate_common::config::AppConfig;
use notigate_dispatch::Publisher;
use notigate_engine::admission::AdmissionController;
use notigate_engine::enrichment::{EnrichmentClient, Upstream};
use notigate_engine::idempotency::IdempotencyGuard;
use notigate_engine::pipeline::NotificationPipeline;
use notigate_engine::reconciler::StatusReconciler;
use notigate_engine::store::{NotificationStore, OrganizationStore};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub cache: Arc<dyn Cache>,
    pub organizations: Arc<dyn OrganizationStore>,
    pub pipeline: Arc<NotificationPipeline>,
    pub reconciler: Arc<StatusReconciler>,
    pub publisher: Arc<dyn Publisher>,
}

impl AppState {
    /// Wire the engine components on top of the given collaborators.
    pub fn new(
        config: AppConfig,
        cache: Arc<dyn Cache>,
        notifications: Arc<dyn NotificationStore>,
        organizations: Arc<dyn OrganizationStore>,
        upstream: Arc<dyn Upstream>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let admission = Arc::new(AdmissionController::new(
            cache.clone(),
            config.rate_limit_per_minute,
        ));
        let enrichment = EnrichmentClient::new(
            cache.clone(),
            upstream,
            config.user_cache_ttl_secs,
            config.template_cache_ttl_secs,
        );
        let pipeline = NotificationPipeline::new(
            IdempotencyGuard::new(cache.clone(), config.idempotency_ttl_secs),
            admission.clone(),
            enrichment,
            notifications.clone(),
            publisher.clone(),
        );
        let reconciler = StatusReconciler::new(notifications, admission);

        Self {
            config,
            cache,
            organizations,
            pipeline: Arc::new(pipeline),
            reconciler: Arc::new(reconciler),
            publisher,
        }
    }
}
