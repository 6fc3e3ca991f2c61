use crate::{
    auth::AuthKeys,
    axum_http::{default_routers, routers},
    config::config_model::DotEnvyConfig,
};
use anyhow::Result;
use axum::{
    Extension, Router,
    http::{
        HeaderName, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use crates::{
    concurrency::{
        distributed_lock::DistributedLock,
        idempotency::{ContentionSettings, IdempotencyGuard},
    },
    domain::repositories::{cache_store::CacheStore, lock_store::LockStore},
    events::bus::EventBus,
    infra::db::postgres::postgres_connection::PgPoolSquad,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

/// Long-lived handles every router builds its use cases from.
#[derive(Clone)]
pub struct Infrastructure {
    pub db_pool: Arc<PgPoolSquad>,
    pub lock_store: Arc<dyn LockStore + Send + Sync>,
    pub cache_store: Arc<dyn CacheStore + Send + Sync>,
    pub events: EventBus,
}

impl Infrastructure {
    pub fn idempotency_guard(&self) -> IdempotencyGuard {
        IdempotencyGuard::new(DistributedLock::new(Arc::clone(&self.lock_store)))
    }
}

pub fn contention_settings(config: &DotEnvyConfig) -> ContentionSettings {
    ContentionSettings {
        lock_ttl: Duration::from_secs(config.lock.ttl_secs),
        max_wait: Duration::from_millis(config.lock.max_wait_ms),
        poll_interval: Duration::from_millis(config.lock.poll_interval_ms),
    }
}

pub fn app(config: Arc<DotEnvyConfig>, infra: Infrastructure) -> Result<Router> {
    let auth_keys = Arc::new(AuthKeys::from_secret(&config.auth.jwt_secret));

    let app = Router::new()
        .fallback(default_routers::not_found)
        .nest(
            "/api/v1/payments",
            routers::payments::routes(Arc::clone(&config), &infra)?,
        )
        .nest(
            "/api/v1/subscriptions",
            routers::subscriptions::routes(Arc::clone(&infra.db_pool)),
        )
        .nest(
            "/api/v1/words",
            routers::words::routes(Arc::clone(&config), &infra)?,
        )
        .nest(
            "/api/v1/videos",
            routers::videos::routes(Arc::clone(&config), &infra),
        )
        .route("/api/v1/health-check", get(default_routers::health_check))
        .layer(Extension(auth_keys))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.backend_server.timeout,
        )))
        .layer(RequestBodyLimitLayer::new(
            (config.backend_server.body_limit * 1024 * 1024).try_into()?,
        ))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([
                    AUTHORIZATION,
                    CONTENT_TYPE,
                    HeaderName::from_static(routers::payments::IDEMPOTENCY_KEY_HEADER),
                ])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http());

    Ok(app)
}

pub async fn start(config: Arc<DotEnvyConfig>, infra: Infrastructure) -> Result<()> {
    let app = app(Arc::clone(&config), infra)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.backend_server.port));
    let listener = TcpListener::bind(addr).await?;

    info!("Server is running on port {}", config.backend_server.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "backend: failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
