use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

/// Shared key-value store that backs distributed locks.
#[automock]
#[async_trait]
pub trait LockStore {
    /// Sets `key` to `value` with expiry `ttl` only if the key is absent.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Deletes `key` only if its current value equals `value`, atomically.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;
}
