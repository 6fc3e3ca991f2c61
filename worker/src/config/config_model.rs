use chrono::{FixedOffset, NaiveTime};
use url::Url;

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub worker_server: WorkerServer,
    pub database: Database,
    pub redis_url: Option<String>,
    pub gateway: Gateway,
    pub storage_retry: StorageRetry,
    pub scheduler: Scheduler,
    pub alert_webhook_url: Option<Url>,
    pub audit: Audit,
    pub mail: Mail,
    pub lock_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct WorkerServer {
    pub port: u16,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Gateway {
    pub base_url: String,
    pub secret_key: String,
    pub timeout_secs: u64,
    pub idempotency_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct StorageRetry {
    pub max_attempts: usize,
    pub backoff_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    pub utc_offset: FixedOffset,
    pub subscription_expiry_at: NaiveTime,
    pub auto_billing_at: NaiveTime,
    pub max_retry: u32,
    pub retry_interval_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct Audit {
    pub workers: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct Mail {
    pub api_url: String,
    pub api_key: String,
}
