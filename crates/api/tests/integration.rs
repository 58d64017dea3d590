//! Integration tests for API routes.
//!
//! Uses `tower::ServiceExt` to test Axum routes without a real HTTP server.
//! Every collaborator is in-process, so no database, cache or broker is needed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use notigate_api::routes::create_router;
use notigate_api::state::AppState;
use notigate_common::cache::{Cache, MemoryCache};
use notigate_common::config::AppConfig;
use notigate_common::types::{Organization, TemplateData, UserData, UserPreferences};
use notigate_dispatch::MemoryPublisher;
use notigate_engine::enrichment::{RequestContext, Upstream, UpstreamError};
use notigate_engine::memory::{MemoryNotificationStore, MemoryOrganizationStore};

const API_KEY: &str = "test-api-key";
const INTERNAL_SECRET: &str = "test-internal-secret";

// ============================================================
// Helpers
// ============================================================

struct FixedUpstream;

#[async_trait]
impl Upstream for FixedUpstream {
    async fn get_user(
        &self,
        user_id: &str,
        _ctx: &RequestContext,
    ) -> Result<UserData, UpstreamError> {
        if user_id != "user-1" {
            return Err(UpstreamError::NotFound {
                entity: "User",
                id: user_id.to_string(),
            });
        }
        Ok(UserData {
            id: user_id.to_string(),
            email: Some("ada@example.com".to_string()),
            name: Some("Ada".to_string()),
            push_token: None,
            preferences: UserPreferences::default(),
        })
    }

    async fn get_template(
        &self,
        code: &str,
        _language: &str,
        _ctx: &RequestContext,
    ) -> Result<TemplateData, UpstreamError> {
        Ok(TemplateData {
            code: code.to_string(),
            content: "Hello {{name}} from {{company}}".to_string(),
            subject: "Welcome".to_string(),
            variables: vec!["name".to_string(), "company".to_string()],
        })
    }
}

/// Create a test AppConfig.
fn test_config() -> AppConfig {
    AppConfig {
        database_url: "unused".to_string(),
        redis_url: None,
        amqp_url: "amqp://unused".to_string(),
        user_service_url: "http://unused".to_string(),
        template_service_url: "http://unused".to_string(),
        internal_api_secret: INTERNAL_SECRET.to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        db_max_connections: 1,
        upstream_timeout_ms: 3000,
        rate_limit_per_minute: 100,
        idempotency_ttl_secs: 600,
        user_cache_ttl_secs: 600,
        template_cache_ttl_secs: 300,
        auth_cache_ttl_secs: 300,
    }
}

struct TestApp {
    router: Router,
    cache: Arc<MemoryCache>,
    publisher: Arc<MemoryPublisher>,
}

async fn build_test_app() -> TestApp {
    let cache = Arc::new(MemoryCache::new());
    let publisher = Arc::new(MemoryPublisher::new());
    let organizations = Arc::new(MemoryOrganizationStore::new());
    organizations
        .insert(
            API_KEY,
            Organization {
                id: "org-1".to_string(),
                name: "Acme".to_string(),
                quota_limit: 5,
                is_active: true,
            },
        )
        .await;

    let state = AppState::new(
        test_config(),
        cache.clone(),
        Arc::new(MemoryNotificationStore::new()),
        organizations,
        Arc::new(FixedUpstream),
        publisher.clone(),
    );

    TestApp {
        router: create_router(state),
        cache,
        publisher,
    }
}

fn post_json(uri: &str, headers: &[(&str, &str)], body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HashMap<String, String>, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, headers, json)
}

fn email_body(request_id: &str) -> Value {
    json!({
        "notification_type": "email",
        "user_id": "user-1",
        "template_code": "welcome",
        "variables": {"name": "Ada", "company": "Acme"},
        "request_id": request_id,
        "priority": 8
    })
}

async fn create(app: &TestApp, request_id: &str) -> (StatusCode, Value) {
    let (status, _, body) = send(
        &app.router,
        post_json(
            "/api/v1/notifications",
            &[("x-api-key", API_KEY)],
            email_body(request_id),
        ),
    )
    .await;
    (status, body)
}

async fn report(app: &TestApp, notification_id: &str, status: &str) -> (StatusCode, Value) {
    let (code, _, body) = send(
        &app.router,
        post_json(
            "/internal/email/status",
            &[("x-internal-secret", INTERNAL_SECRET)],
            json!({
                "notification_id": notification_id,
                "organization_id": "org-1",
                "status": status,
                "timestamp": "2025-03-01T12:00:00Z"
            }),
        ),
    )
    .await;
    (code, body)
}

// ============================================================
// Health
// ============================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = build_test_app().await;
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let (status, _, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["broker"], "ok");
}

#[tokio::test]
async fn test_health_reports_broker_outage() {
    let app = build_test_app().await;
    app.publisher.set_failing(true);
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let (status, _, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["checks"]["broker"], "unavailable");
    assert_eq!(body["checks"]["cache"], "ok");
}

// ============================================================
// Create notification
// ============================================================

#[tokio::test]
async fn test_create_requires_api_key() {
    let app = build_test_app().await;

    for headers in [vec![], vec![("x-api-key", "wrong-key")]] {
        let (status, _, body) = send(
            &app.router,
            post_json("/api/v1/notifications", &headers, email_body("r1")),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "authentication_failed");
        assert_eq!(body["error"], "Missing or invalid API key");
    }
    assert_eq!(app.publisher.count(), 0);
}

#[tokio::test]
async fn test_create_accepts_then_replays() {
    let app = build_test_app().await;

    let (status, headers, first) = send(
        &app.router,
        post_json(
            "/api/v1/notifications",
            &[("x-api-key", API_KEY), ("x-correlation-id", "trace-42")],
            email_body("r1"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(first["status"], "accepted");
    assert_eq!(first["request_id"], "r1");
    assert_eq!(first["correlation_id"], "trace-42");
    assert_eq!(headers.get("x-correlation-id").map(String::as_str), Some("trace-42"));

    let (status, replay) = create(&app, "r1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["notification_id"], first["notification_id"]);

    let published = app.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].routing_key, "email.queue");
    assert_eq!(published[0].priority, 8);

    // Organization lookup was cached under the hashed key
    let auth_key = format!(
        "authkey:{}",
        notigate_api::middleware::auth::hash_api_key(API_KEY)
    );
    assert!(app.cache.get(&auth_key).await.unwrap().is_some());
}

#[tokio::test]
async fn test_create_generates_correlation_id() {
    let app = build_test_app().await;
    let (status, headers, body) = send(
        &app.router,
        post_json(
            "/api/v1/notifications",
            &[("x-api-key", API_KEY)],
            email_body("r1"),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let echoed = headers.get("x-correlation-id").cloned().unwrap();
    assert_eq!(body["correlation_id"], echoed.as_str());
    assert!(uuid::Uuid::parse_str(&echoed).is_ok());
}

#[tokio::test]
async fn test_create_reports_missing_variables() {
    let app = build_test_app().await;
    let mut body = email_body("r1");
    body["variables"] = json!({"name": "Ada"});

    let (status, _, body) = send(
        &app.router,
        post_json("/api/v1/notifications", &[("x-api-key", API_KEY)], body),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "missing_template_variables");
    assert_eq!(body["missing_variables"], json!(["company"]));
}

#[tokio::test]
async fn test_create_rejects_malformed_body() {
    let app = build_test_app().await;

    let (status, _, body) = send(
        &app.router,
        post_json(
            "/api/v1/notifications",
            &[("x-api-key", API_KEY)],
            json!({"notification_type": "email"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");

    let mut invalid_priority = email_body("r2");
    invalid_priority["priority"] = json!(11);
    let (status, _, _) = send(
        &app.router,
        post_json(
            "/api/v1/notifications",
            &[("x-api-key", API_KEY)],
            invalid_priority,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_unknown_user_is_404() {
    let app = build_test_app().await;
    let mut body = email_body("r1");
    body["user_id"] = json!("ghost");

    let (status, _, body) = send(
        &app.router,
        post_json("/api/v1/notifications", &[("x-api-key", API_KEY)], body),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_create_surfaces_dispatch_failure() {
    let app = build_test_app().await;
    app.publisher.set_failing(true);

    let (status, body) = create(&app, "r1").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "dispatch_failed");

    // Same idempotency key goes through once the broker is back
    app.publisher.set_failing(false);
    let (status, body) = create(&app, "r1").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["request_id"], "r1");
    assert_eq!(app.publisher.count(), 1);
}

// ============================================================
// Status lookup
// ============================================================

#[tokio::test]
async fn test_status_lookup() {
    let app = build_test_app().await;
    let (_, created) = create(&app, "r1").await;
    let id = created["notification_id"].as_str().unwrap().to_string();

    let (status, _, body) = send(
        &app.router,
        post_json(
            "/api/v1/notifications/status",
            &[("x-api-key", API_KEY)],
            json!({"notification_id": id}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["notification_type"], "email");
    assert_eq!(body["priority"], 8);

    let (status, _, _) = send(
        &app.router,
        post_json(
            "/api/v1/notifications/status",
            &[("x-api-key", API_KEY)],
            json!({"notification_id": uuid::Uuid::new_v4()}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(
        &app.router,
        post_json(
            "/api/v1/notifications/status",
            &[("x-api-key", API_KEY)],
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================
// Worker callbacks
// ============================================================

#[tokio::test]
async fn test_internal_requires_secret() {
    let app = build_test_app().await;
    let (status, _, body) = send(
        &app.router,
        post_json(
            "/internal/email/status",
            &[("x-internal-secret", "nope")],
            json!({
                "notification_id": uuid::Uuid::new_v4(),
                "organization_id": "org-1",
                "status": "delivered"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "authentication_failed");
}

#[tokio::test]
async fn test_delivery_report_lifecycle() {
    let app = build_test_app().await;
    let (_, created) = create(&app, "r1").await;
    let id = created["notification_id"].as_str().unwrap().to_string();

    let (status, body) = report(&app, &id, "processing").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["previous_status"], "queued");

    let (status, body) = report(&app, &id, "delivered").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "delivered");

    // Duplicate report is acknowledged
    let (status, _) = report(&app, &id, "delivered").await;
    assert_eq!(status, StatusCode::OK);

    // Conflicting terminal report is refused
    let (status, body) = report(&app, &id, "bounced").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_transition");

    assert_eq!(
        notigate_common::cache::get_counter(app.cache.as_ref(), "quota:org-1")
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        notigate_common::cache::get_counter(app.cache.as_ref(), "pending:org-1")
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_delivery_report_validation() {
    let app = build_test_app().await;
    let (_, created) = create(&app, "r1").await;
    let id = created["notification_id"].as_str().unwrap().to_string();

    let (status, body) = report(&app, &id, "sent").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");

    let (status, _) = report(&app, &uuid::Uuid::new_v4().to_string(), "delivered").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The route's channel must match the notification's
    let (status, _, _) = send(
        &app.router,
        post_json(
            "/internal/push/status",
            &[("x-internal-secret", INTERNAL_SECRET)],
            json!({
                "notification_id": id,
                "organization_id": "org-1",
                "status": "delivered"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
