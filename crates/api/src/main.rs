//! Notification gateway API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use notigate_common::cache::{Cache, MemoryCache, RedisCache};
use notigate_common::config::AppConfig;
use notigate_common::db::{create_pool, run_migrations};
use notigate_dispatch::AmqpPublisher;
use notigate_engine::enrichment::HttpUpstream;
use notigate_engine::store::{PgNotificationStore, PgOrganizationStore};

use notigate_api::routes::create_router;
use notigate_api::state::AppState;

const MAX_BODY_BYTES: usize = 1024 * 1024;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "notigate_api=debug,notigate_engine=debug,notigate_dispatch=info,tower_http=debug",
        )
    });

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn connect_cache(config: &AppConfig) -> anyhow::Result<Arc<dyn Cache>> {
    match &config.redis_url {
        Some(url) => {
            let cache = RedisCache::connect(url).await?;
            tracing::info!("Redis connection established");
            Ok(Arc::new(cache))
        }
        None => {
            tracing::warn!(
                "REDIS_URL not set; using an in-process cache. Counters are not shared between instances"
            );
            Ok(Arc::new(MemoryCache::new()))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down API server");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    tracing::info!("Starting notification gateway...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Database
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;

    let cache = connect_cache(&config).await?;

    // Broker connection is established lazily on first publish
    let publisher = Arc::new(AmqpPublisher::new(config.amqp_url.clone()));

    let upstream = HttpUpstream::new(
        &config.user_service_url,
        &config.template_service_url,
        &config.internal_api_secret,
        Duration::from_millis(config.upstream_timeout_ms),
    )?;

    let addr: SocketAddr = config.bind_addr.parse()?;

    // Build application state
    let state = AppState::new(
        config,
        cache,
        Arc::new(PgNotificationStore::new(pool.clone())),
        Arc::new(PgOrganizationStore::new(pool)),
        Arc::new(upstream),
        publisher,
    );

    // Build router
    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
