use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, RedisError, Script, aio::MultiplexedConnection};
use tokio::{sync::Mutex, time::timeout};
use tracing::warn;

use crate::domain::repositories::{cache_store::CacheStore, lock_store::LockStore};

/// Deletes the key only while it still holds the caller's token.
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Whether the error means the multiplexed connection is dead and must be
/// rebuilt. Command-level errors leave it in place.
fn needs_reconnect(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal()
}

pub struct RedisStore {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    op_timeout: Duration,
}

impl RedisStore {
    pub fn new(url: &str, op_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url).context("redis: invalid connection url")?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            op_timeout,
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = timeout(
            self.op_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| anyhow!("redis: connect timed out"))?
        .context("redis: failed to connect")?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Forgets the cached connection so the next operation dials again.
    async fn drop_connection(&self, op: &str) {
        if self.connection.lock().await.take().is_some() {
            warn!(op, "redis: connection dropped, reconnecting on next use");
        }
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                if needs_reconnect(&err) {
                    self.drop_connection(op).await;
                }
                Err(anyhow::Error::new(err).context(format!("redis: {op} failed")))
            }
            Err(_) => {
                self.drop_connection(op).await;
                Err(anyhow!("redis: {op} timed out"))
            }
        }
    }
}

#[async_trait]
impl LockStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection().await?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let reply: Option<String> = self
            .bounded(
                "SET NX",
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let script = Script::new(COMPARE_AND_DELETE);
        let deleted: i64 = self
            .bounded(
                "compare-and-delete",
                script.key(key).arg(value).invoke_async(&mut conn),
            )
            .await?;
        Ok(deleted == 1)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let found: bool = self.bounded("EXISTS", conn.exists(key)).await?;
        Ok(found)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = self.bounded("GET", conn.get(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = self
            .bounded("SET EX", conn.set_ex(key, value, ttl.as_secs().max(1)))
            .await?;
        Ok(())
    }
}
