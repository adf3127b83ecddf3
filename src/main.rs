use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use task_status_gate::{
    app_state::AppState,
    config::{AppConfig, KeyCacheBackend},
    routes,
    services::{
        key_cache::{KeyCache, MemoryKeyCache, RedisKeyCache},
        queue::TaskQueue,
        status_store::JobStatusStore,
        token::TokenVerifier,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing task-status-gate server");

    let prometheus_handle = Arc::new(
        routes::metrics::init_metrics_recorder()
            .expect("Failed to install Prometheus metrics recorder"),
    );

    let key_cache: Arc<dyn KeyCache> = match config.key_cache {
        KeyCacheBackend::Redis => {
            tracing::info!("Using Redis key-set cache");
            Arc::new(RedisKeyCache::new(&config.redis_url).expect("Failed to initialize Redis key cache"))
        }
        KeyCacheBackend::Memory => {
            tracing::info!("Using in-memory key-set cache");
            Arc::new(MemoryKeyCache::new())
        }
    };

    let verifier_config = config
        .token_verifier_config()
        .expect("Invalid token verifier configuration");
    if verifier_config.admin_token.is_some() {
        tracing::warn!("Static admin token is enabled");
    }
    let verifier = TokenVerifier::new(verifier_config, key_cache);

    tracing::info!("Connecting to Redis task queue");
    let queue = TaskQueue::new(&config.redis_url).expect("Failed to initialize task queue");

    let store = JobStatusStore::new(config.task_status_ttl());

    let state = AppState::new(store, verifier, Arc::new(queue), &config.public_base_url);

    let app = Router::new()
        .merge(routes::api_router(state))
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
