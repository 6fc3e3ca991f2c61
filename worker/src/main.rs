use anyhow::Result;
use crates::{
    application::{
        payments::{PaymentPipeline, PaymentPipelineSettings},
        subscriptions::{AutoBillingUseCase, SubscriptionExpiryUseCase},
    },
    concurrency::{distributed_lock::DistributedLock, idempotency::IdempotencyGuard},
    domain::repositories::subscriptions::SubscriptionRepository,
    events::{audit_trail::AuditTrail, bus::EventBus},
    infra::{
        db::{
            postgres::postgres_connection,
            repositories::{
                app_users::AppUserPostgres, payment_histories::PaymentHistoryPostgres,
                payments::PaymentPostgres, plans::PlanPostgres,
                subscriptions::SubscriptionPostgres,
            },
        },
        kv::connect_stores,
    },
    observability::{DiscordNotificationChannel, LogNotificationChannel, NotificationChannel},
    payments::{gateway_client::GatewayClient, mail_client::MailApiClient},
    resilience::retry::RetryPolicy,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{error, info, warn};
use worker::{
    axum_http::http_serve,
    config::config_loader,
    jobs::{auto_billing::AutoBillingJob, subscription_expiry::SubscriptionExpiryJob},
    scheduler::{
        retry_runner::{JobRetrySettings, RetryingJobRunner},
        schedule_loop::{DailySchedule, Scheduler, trigger_channel},
        trigger::ScheduledJob,
    },
};

const REDIS_OP_TIMEOUT: Duration = Duration::from_secs(2);
const ALERT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        error!("Worker exited with error: {}", error);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    crates::observability::init_observability("worker")?;

    let dotenvy_env = Arc::new(config_loader::load()?);
    info!("ENV has been loaded");

    let db_pool = Arc::new(postgres_connection::establish_connection(
        &dotenvy_env.database.url,
    )?);
    info!("Postgres connection has been established");

    let stores = connect_stores(dotenvy_env.redis_url.as_deref(), REDIS_OP_TIMEOUT)?;
    let lock = DistributedLock::new(stores.lock_store);

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

    let gateway_config = &dotenvy_env.gateway;
    let subscription_repository: Arc<dyn SubscriptionRepository + Send + Sync> =
        Arc::new(SubscriptionPostgres::new(Arc::clone(&db_pool)));
    let pipeline = Arc::new(PaymentPipeline::new(
        Arc::new(PaymentPostgres::new(Arc::clone(&db_pool))),
        Arc::new(PlanPostgres::new(Arc::clone(&db_pool))),
        Arc::clone(&subscription_repository),
        Arc::new(GatewayClient::new(
            &gateway_config.base_url,
            &gateway_config.secret_key,
            Duration::from_secs(gateway_config.timeout_secs),
        )?),
        IdempotencyGuard::new(lock.clone()),
        events,
        PaymentPipelineSettings {
            gateway_timeout: Duration::from_secs(gateway_config.timeout_secs),
            idempotency_ttl: Duration::from_secs(gateway_config.idempotency_ttl_secs),
            storage_retry: RetryPolicy::fixed(
                dotenvy_env.storage_retry.max_attempts,
                Duration::from_millis(dotenvy_env.storage_retry.backoff_ms),
            ),
        },
    ));

    let scheduler_config = &dotenvy_env.scheduler;
    let expiry_job = SubscriptionExpiryJob::new(Arc::new(SubscriptionExpiryUseCase::new(
        Arc::clone(&subscription_repository),
        scheduler_config.utc_offset,
    )));
    let auto_billing_job = AutoBillingJob::new(Arc::new(AutoBillingUseCase::new(
        Arc::clone(&subscription_repository),
        pipeline,
        lock,
        // Outlives a full renewal: gateway call plus retried storage writes.
        Duration::from_secs(gateway_config.timeout_secs * 3 + dotenvy_env.lock_ttl_secs),
        scheduler_config.utc_offset,
    )));

    let notifier: Arc<dyn NotificationChannel + Send + Sync> =
        match dotenvy_env.alert_webhook_url.clone() {
            Some(url) => Arc::new(DiscordNotificationChannel::new(url, ALERT_TIMEOUT)?),
            None => {
                warn!("worker: no alert webhook configured, job alerts go to logs only");
                Arc::new(LogNotificationChannel)
            }
        };

    let (sink, retries) = trigger_channel();
    let runner = RetryingJobRunner::new(
        Arc::new(sink),
        notifier,
        JobRetrySettings {
            max_retry: scheduler_config.max_retry,
            retry_interval: chrono::Duration::minutes(scheduler_config.retry_interval_minutes),
        },
    );

    let jobs = vec![
        Arc::new(expiry_job) as Arc<dyn ScheduledJob>,
        Arc::new(auto_billing_job) as Arc<dyn ScheduledJob>,
    ];
    let schedules = vec![
        DailySchedule {
            job_key: worker::jobs::subscription_expiry::JOB_KEY.to_string(),
            at: scheduler_config.subscription_expiry_at,
        },
        DailySchedule {
            job_key: worker::jobs::auto_billing::JOB_KEY.to_string(),
            at: scheduler_config.auto_billing_at,
        },
    ];
    let scheduler = Scheduler::new(
        jobs,
        schedules,
        scheduler_config.utc_offset,
        runner,
        retries,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        http_serve::shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let scheduler_task = tokio::spawn(scheduler.run(wait_for_shutdown(shutdown_rx.clone())));
    let health_server = tokio::spawn(http_serve::start(
        Arc::clone(&dotenvy_env),
        wait_for_shutdown(shutdown_rx),
    ));

    let (scheduler_result, server_result) = tokio::join!(scheduler_task, health_server);
    scheduler_result??;
    server_result??;

    // Scheduler and pipeline are gone, so the event queue drains and closes.
    if let Err(err) = audit_pool.await {
        warn!(error = %err, "worker: audit pool ended abnormally");
    }
    info!("Worker stopped");

    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}
