use std::{env, str::FromStr};

use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveTime};
use url::Url;

use super::config_model::{
    Audit, Database, DotEnvyConfig, Gateway, Mail, Scheduler, StorageRetry, WorkerServer,
};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let worker_server = WorkerServer {
        port: required_parse("SERVER_PORT_WORKER")?,
        timeout: parse_or("SERVER_TIMEOUT", 30)?,
    };

    let database = Database {
        url: required("DATABASE_URL")?,
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

    let offset_hours: i32 = parse_or("SCHEDULER_UTC_OFFSET_HOURS", 0)?;
    let scheduler = Scheduler {
        utc_offset: FixedOffset::east_opt(offset_hours * 3600)
            .context("SCHEDULER_UTC_OFFSET_HOURS is invalid")?,
        subscription_expiry_at: time_or("SUBSCRIPTION_EXPIRY_AT", "00:05")?,
        auto_billing_at: time_or("AUTO_BILLING_AT", "09:00")?,
        max_retry: parse_or("JOB_MAX_RETRY", 3)?,
        retry_interval_minutes: parse_or("JOB_RETRY_INTERVAL_MINUTES", 10)?,
    };

    let alert_webhook_url = optional("ALERT_WEBHOOK_URL")
        .or_else(|| optional("DISCORD_WEBHOOK_URL"))
        .map(|raw| Url::parse(&raw).context("ALERT_WEBHOOK_URL is invalid"))
        .transpose()?;

    let audit = Audit {
        workers: parse_or("AUDIT_WORKERS", 4)?,
        queue_capacity: parse_or("AUDIT_QUEUE_CAPACITY", 1024)?,
    };

    let mail = Mail {
        api_url: required("MAIL_API_URL")?,
        api_key: required("MAIL_API_KEY")?,
    };

    Ok(DotEnvyConfig {
        worker_server,
        database,
        redis_url: optional("REDIS_URL"),
        gateway,
        storage_retry,
        scheduler,
        alert_webhook_url,
        audit,
        mail,
        lock_ttl_secs: parse_or("LOCK_TTL_SECS", 10)?,
    })
}

/// Parses `HH:MM` wall-clock times.
pub fn parse_wall_clock(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .with_context(|| format!("expected HH:MM, got {raw}"))
}

fn time_or(key: &str, default: &str) -> Result<NaiveTime> {
    let raw = optional(key).unwrap_or_else(|| default.to_string());
    parse_wall_clock(&raw).with_context(|| format!("{key} is invalid"))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_clock_accepts_hh_mm_only() {
        assert_eq!(
            parse_wall_clock("09:00").unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap()
        );
        assert_eq!(
            parse_wall_clock(" 00:05 ").unwrap(),
            NaiveTime::from_hms_opt(0, 5, 0).unwrap()
        );
        assert!(parse_wall_clock("9am").is_err());
        assert!(parse_wall_clock("25:00").is_err());
    }
}
