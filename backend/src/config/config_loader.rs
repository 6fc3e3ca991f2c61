use std::{env, str::FromStr};

use anyhow::{Context, Result};

use super::config_model::{
    Audit, Auth, BackendServer, Database, DotEnvyConfig, Gateway, Lock, Lookups, Mail, Redis,
    StorageRetry,
};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let backend_server = BackendServer {
        port: required_parse("SERVER_PORT_BACKEND")?,
        body_limit: required_parse("SERVER_BODY_LIMIT")?,
        timeout: required_parse("SERVER_TIMEOUT")?,
    };

    let database = Database {
        url: required("DATABASE_URL")?,
    };

    let redis = Redis {
        url: optional("REDIS_URL"),
    };

    let auth = Auth {
        jwt_secret: required("JWT_SECRET")?,
    };

    let timeout_secs = parse_or("PAYMENT_GATEWAY_TIMEOUT_SECS", 10)?;
    let gateway = Gateway {
        base_url: required("PAYMENT_GATEWAY_BASE_URL")?,
        secret_key: required("PAYMENT_GATEWAY_SECRET_KEY")?,
        timeout_secs,
        idempotency_ttl_secs: parse_or("PAYMENT_IDEMPOTENCY_TTL_SECS", timeout_secs * 6)?,
    };

    let storage_retry = StorageRetry {
        max_attempts: parse_or("STORAGE_RETRY_MAX_ATTEMPTS", 3)?,
        backoff_ms: parse_or("STORAGE_RETRY_BACKOFF_MS", 200)?,
    };

    let audit = Audit {
        workers: parse_or("AUDIT_WORKERS", 4)?,
        queue_capacity: parse_or("AUDIT_QUEUE_CAPACITY", 1024)?,
    };

    let mail = Mail {
        api_url: required("MAIL_API_URL")?,
        api_key: required("MAIL_API_KEY")?,
    };

    let lookups = Lookups {
        dictionary_base_url: required("DICTIONARY_API_BASE_URL")?,
        youtube_api_key: required("YOUTUBE_API_KEY")?,
        video_cache_ttl_secs: parse_or("VIDEO_CACHE_TTL_SECS", 3600)?,
    };

    let lock = Lock {
        ttl_secs: parse_or("LOCK_TTL_SECS", 10)?,
        max_wait_ms: parse_or("LOCK_MAX_WAIT_MS", 5000)?,
        poll_interval_ms: parse_or("LOCK_POLL_INTERVAL_MS", 100)?,
    };

    Ok(DotEnvyConfig {
        backend_server,
        database,
        redis,
        auth,
        gateway,
        storage_retry,
        audit,
        mail,
        lookups,
        lock,
    })
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn required(key: &str) -> Result<String> {
    optional(key).with_context(|| format!("{key} is invalid"))
}

fn required_parse<T>(key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    required(key)?
        .parse()
        .with_context(|| format!("{key} is invalid"))
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(raw) => raw.parse().with_context(|| format!("{key} is invalid")),
        None => Ok(default),
    }
}
