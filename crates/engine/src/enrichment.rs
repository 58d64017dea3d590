//! Upstream enrichment: user and template lookups with read-through caching.
//!
//! Each admission needs the recipient (user directory service) and the
//! template (template store service). Both are fetched concurrently and
//! joined; neither failure cancels the other. Only successful responses are
//! cached:
//! - `user:<user_id>:<org_id>` (default 10 minutes)
//! - `template:<org_id>:<code>:<lang>` (default 5 minutes)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use notigate_common::cache::Cache;
use notigate_common::error::GatewayError;
use notigate_common::types::{NotificationType, TemplateData, UserData};

pub const DEFAULT_USER_CACHE_TTL_SECS: u64 = 600;
pub const DEFAULT_TEMPLATE_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{service} service timed out")]
    Timeout { service: &'static str },

    #[error("{service} service unavailable: {reason}")]
    Unavailable {
        service: &'static str,
        reason: String,
    },

    #[error("{service} service returned an invalid response: {reason}")]
    InvalidResponse {
        service: &'static str,
        reason: String,
    },
}

impl From<UpstreamError> for GatewayError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::NotFound { .. } => GatewayError::NotFound(err.to_string()),
            _ => GatewayError::Upstream(err.to_string()),
        }
    }
}

/// Tenant and tracing context forwarded to upstream services.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub org_id: String,
    pub correlation_id: String,
}

/// Raw access to the user directory and template store.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn get_user(&self, user_id: &str, ctx: &RequestContext)
    -> Result<UserData, UpstreamError>;

    async fn get_template(
        &self,
        code: &str,
        language: &str,
        ctx: &RequestContext,
    ) -> Result<TemplateData, UpstreamError>;
}

/// Response envelope shared by both upstream services.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the two upstream services.
pub struct HttpUpstream {
    client: reqwest::Client,
    user_service_url: Url,
    template_service_url: Url,
    internal_secret: String,
}

impl HttpUpstream {
    pub fn new(
        user_service_url: &str,
        template_service_url: &str,
        internal_secret: &str,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            user_service_url: base_url(user_service_url)?,
            template_service_url: base_url(template_service_url)?,
            internal_secret: internal_secret.to_string(),
        })
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        service: &'static str,
        entity: &'static str,
        id: &str,
        request: reqwest::RequestBuilder,
        ctx: &RequestContext,
    ) -> Result<T, UpstreamError> {
        let response = request
            .header("X-Organization-ID", &ctx.org_id)
            .header("X-Correlation-ID", &ctx.correlation_id)
            .header("X-Internal-Secret", &self.internal_secret)
            .send()
            .await
            .map_err(|e| transport_error(service, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(UpstreamError::NotFound {
                entity,
                id: id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(UpstreamError::Unavailable {
                service,
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| transport_error(service, e))?;

        match envelope {
            Envelope {
                success: true,
                data: Some(data),
                ..
            } => Ok(data),
            Envelope { message, .. } => {
                tracing::debug!(service, id, ?message, "Upstream reported failure");
                Err(UpstreamError::NotFound {
                    entity,
                    id: id.to_string(),
                })
            }
        }
    }
}

fn base_url(raw: &str) -> Result<Url, GatewayError> {
    let url = Url::parse(raw)
        .map_err(|e| GatewayError::Internal(format!("invalid upstream URL '{}': {}", raw, e)))?;
    if url.cannot_be_a_base() {
        return Err(GatewayError::Internal(format!(
            "upstream URL '{}' cannot carry a path",
            raw
        )));
    }
    Ok(url)
}

/// `base` with `segments` appended, each percent-encoded as one path segment.
///
/// Caller-supplied ids must go through [`path_id`] first.
fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Reject ids that would not survive as a single path segment.
fn path_id<'a>(entity: &'static str, id: &'a str) -> Result<&'a str, UpstreamError> {
    if id.is_empty() || id == "." || id == ".." {
        return Err(UpstreamError::NotFound {
            entity,
            id: id.to_string(),
        });
    }
    Ok(id)
}

fn transport_error(service: &'static str, err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout { service }
    } else if err.is_decode() {
        UpstreamError::InvalidResponse {
            service,
            reason: err.to_string(),
        }
    } else {
        UpstreamError::Unavailable {
            service,
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn get_user(
        &self,
        user_id: &str,
        ctx: &RequestContext,
    ) -> Result<UserData, UpstreamError> {
        let id = path_id("User", user_id)?;
        let url = endpoint(&self.user_service_url, &["users", id]);
        self.fetch("user", "User", user_id, self.client.get(url), ctx)
            .await
    }

    async fn get_template(
        &self,
        code: &str,
        language: &str,
        ctx: &RequestContext,
    ) -> Result<TemplateData, UpstreamError> {
        let id = path_id("Template", code)?;
        let url = endpoint(
            &self.template_service_url,
            &["api", "v1", "templates", id, ""],
        );
        let request = self.client.get(url).query(&[("language", language)]);
        self.fetch("template", "Template", code, request, ctx).await
    }
}

/// Read-through cached access to user and template data.
pub struct EnrichmentClient {
    cache: Arc<dyn Cache>,
    upstream: Arc<dyn Upstream>,
    user_ttl_secs: u64,
    template_ttl_secs: u64,
}

impl EnrichmentClient {
    pub fn new(
        cache: Arc<dyn Cache>,
        upstream: Arc<dyn Upstream>,
        user_ttl_secs: u64,
        template_ttl_secs: u64,
    ) -> Self {
        Self {
            cache,
            upstream,
            user_ttl_secs,
            template_ttl_secs,
        }
    }

    pub fn user_key(user_id: &str, org_id: &str) -> String {
        format!("user:{}:{}", user_id, org_id)
    }

    pub fn template_key(org_id: &str, code: &str, language: &str) -> String {
        format!("template:{}:{}:{}", org_id, code, language)
    }

    pub async fn fetch_user(
        &self,
        user_id: &str,
        ctx: &RequestContext,
    ) -> Result<UserData, UpstreamError> {
        let key = Self::user_key(user_id, &ctx.org_id);
        if let Some(user) = self.cached::<UserData>(&key).await {
            tracing::debug!(user_id, "User cache hit");
            return Ok(user);
        }

        let user = self.upstream.get_user(user_id, ctx).await?;
        self.fill(&key, &user, self.user_ttl_secs).await;
        Ok(user)
    }

    pub async fn fetch_template(
        &self,
        code: &str,
        language: &str,
        ctx: &RequestContext,
    ) -> Result<TemplateData, UpstreamError> {
        let key = Self::template_key(&ctx.org_id, code, language);
        if let Some(template) = self.cached::<TemplateData>(&key).await {
            tracing::debug!(template_code = code, "Template cache hit");
            return Ok(template);
        }

        let template = self.upstream.get_template(code, language, ctx).await?;
        self.fill(&key, &template, self.template_ttl_secs).await;
        Ok(template)
    }

    /// Fetch user and template concurrently and wait for both.
    pub async fn enrich(
        &self,
        user_id: &str,
        template_code: &str,
        ctx: &RequestContext,
    ) -> (
        Result<UserData, UpstreamError>,
        Result<TemplateData, UpstreamError>,
    ) {
        tokio::join!(
            self.fetch_user(user_id, ctx),
            self.fetch_template(template_code, DEFAULT_LANGUAGE, ctx),
        )
    }

    /// Cache reads degrade to a miss; the upstream stays authoritative.
    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.cache.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache read failed, going upstream");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Evicting unreadable cache entry");
                if let Err(e) = self.cache.del(key).await {
                    tracing::warn!(key, error = %e, "Cache eviction failed");
                }
                None
            }
        }
    }

    async fn fill<T: serde::Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(key, error = %e, "Could not encode cache entry");
                return;
            }
        };
        if let Err(e) = self.cache.set_ex(key, &encoded, ttl_secs).await {
            tracing::warn!(key, error = %e, "Cache write failed");
        }
    }
}

/// Required template variables absent from `provided`, in template order.
pub fn missing_variables(template: &TemplateData, provided: &HashMap<String, String>) -> Vec<String> {
    template
        .variables
        .iter()
        .filter(|name| !provided.contains_key(name.as_str()))
        .cloned()
        .collect()
}

/// Check the user can receive this kind of notification.
pub fn check_deliverable(
    user: &UserData,
    notification_type: NotificationType,
) -> Result<(), GatewayError> {
    if !user.preferences.allows(notification_type) {
        return Err(GatewayError::OptedOut(notification_type));
    }

    if notification_type == NotificationType::Push
        && user.push_token.as_deref().is_none_or(|t| t.trim().is_empty())
    {
        return Err(GatewayError::NoPushToken);
    }

    Ok(())
}
