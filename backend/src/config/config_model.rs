#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub backend_server: BackendServer,
    pub database: Database,
    pub redis: Redis,
    pub auth: Auth,
    pub gateway: Gateway,
    pub storage_retry: StorageRetry,
    pub audit: Audit,
    pub mail: Mail,
    pub lookups: Lookups,
    pub lock: Lock,
}

#[derive(Debug, Clone)]
pub struct BackendServer {
    pub port: u16,
    pub body_limit: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

/// `url` is `None` when the lock store falls back to process memory.
#[derive(Debug, Clone)]
pub struct Redis {
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Auth {
    pub jwt_secret: String,
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
pub struct Audit {
    pub workers: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct Mail {
    pub api_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct Lookups {
    pub dictionary_base_url: String,
    pub youtube_api_key: String,
    pub video_cache_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Lock {
    pub ttl_secs: u64,
    pub max_wait_ms: u64,
    pub poll_interval_ms: u64,
}
