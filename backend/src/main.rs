use anyhow::Result;
use backend::axum_http::http_serve::{self, Infrastructure};
use backend::config::config_loader;
use crates::{
    events::{audit_trail::AuditTrail, bus::EventBus},
    infra::{
        db::{
            postgres::postgres_connection,
            repositories::{
                app_users::AppUserPostgres, payment_histories::PaymentHistoryPostgres,
                payments::PaymentPostgres,
            },
        },
        kv::connect_stores,
    },
    payments::mail_client::MailApiClient,
};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

const REDIS_OP_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        error!("Backend exited with error: {}", error);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    crates::observability::init_observability("backend")?;

    let dotenvy_env = Arc::new(config_loader::load()?);
    info!("ENV has been loaded");

    let db_pool = Arc::new(postgres_connection::establish_connection(
        &dotenvy_env.database.url,
    )?);
    info!("Postgres connection has been established");

    let stores = connect_stores(dotenvy_env.redis.url.as_deref(), REDIS_OP_TIMEOUT)?;

    let (events, event_rx) = EventBus::channel(dotenvy_env.audit.queue_capacity);
    let audit_trail = Arc::new(AuditTrail::new(
        Arc::new(PaymentHistoryPostgres::new(Arc::clone(&db_pool))),
        Arc::new(PaymentPostgres::new(Arc::clone(&db_pool))),
        Arc::new(AppUserPostgres::new(Arc::clone(&db_pool))),
        Arc::new(MailApiClient::new(
            &dotenvy_env.mail.api_url,
            dotenvy_env.mail.api_key.clone(),
        )?),
    ));
    let audit_pool = audit_trail.spawn(event_rx, dotenvy_env.audit.workers);

    let infra = Infrastructure {
        db_pool,
        lock_store: stores.lock_store,
        cache_store: stores.cache_store,
        events,
    };
    http_serve::start(Arc::clone(&dotenvy_env), infra).await?;

    // The server has dropped every producer; wait for queued audit events.
    if let Err(err) = audit_pool.await {
        warn!(error = %err, "backend: audit pool ended abnormally");
    }
    info!("Backend stopped");

    Ok(())
}
