use std::{future::Future, time::Duration};

use thiserror::Error;
use tracing::{debug, warn};

use super::distributed_lock::DistributedLock;

#[derive(Debug, Error)]
pub enum ContentionError {
    #[error("timed out waiting for another worker to produce {resource_key}")]
    ConcurrencyTimeout { resource_key: String },
    #[error("lookup failed: {0}")]
    Lookup(anyhow::Error),
    #[error("compute failed: {0}")]
    Compute(anyhow::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct ContentionSettings {
    pub lock_ttl: Duration,
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for ContentionSettings {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(10),
            max_wait: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Proof that the caller holds a reserved idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationHandle {
    key: String,
    token: String,
}

impl ReservationHandle {
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    Fresh(ReservationHandle),
    Duplicate,
}

/// At-most-once request handling and compute-once population of shared
/// resources, both built on [`DistributedLock`].
#[derive(Clone)]
pub struct IdempotencyGuard {
    lock: DistributedLock,
}

impl IdempotencyGuard {
    pub fn new(lock: DistributedLock) -> Self {
        Self { lock }
    }

    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    /// Reserves `key` within `scope` for `ttl`. A reservation that is not
    /// released simply expires.
    pub async fn check_and_reserve(&self, scope: &str, key: &str, ttl: Duration) -> Reservation {
        let handle = ReservationHandle {
            key: format!("idem:{scope}:{key}"),
            token: DistributedLock::new_holder_token(),
        };

        if self.lock.try_lock(&handle.key, &handle.token, ttl).await {
            Reservation::Fresh(handle)
        } else {
            debug!(key = %handle.key, "idempotency: key already reserved");
            Reservation::Duplicate
        }
    }

    pub async fn release(&self, handle: &ReservationHandle) -> bool {
        self.lock.unlock(&handle.key, &handle.token).await
    }

    /// Returns the resource from `lookup`, running `compute` at most once
    /// across concurrent callers when it is missing.
    ///
    /// The lock winner re-checks, computes and always unlocks. Everyone else
    /// waits for the lock to disappear and looks again.
    pub async fn compute_once<T, L, LF, C, CF>(
        &self,
        resource_key: &str,
        settings: &ContentionSettings,
        lookup: L,
        compute: C,
    ) -> Result<T, ContentionError>
    where
        L: Fn() -> LF,
        LF: Future<Output = anyhow::Result<Option<T>>>,
        C: FnOnce() -> CF,
        CF: Future<Output = anyhow::Result<T>>,
    {
        if let Some(found) = lookup().await.map_err(ContentionError::Lookup)? {
            return Ok(found);
        }

        let lock_key = format!("lock:{resource_key}");
        let token = DistributedLock::new_holder_token();

        if self.lock.try_lock(&lock_key, &token, settings.lock_ttl).await {
            let result = match lookup().await {
                Ok(Some(found)) => Ok(found),
                Ok(None) => compute().await.map_err(ContentionError::Compute),
                Err(err) => Err(ContentionError::Lookup(err)),
            };
            if !self.lock.unlock(&lock_key, &token).await {
                warn!(%lock_key, "idempotency: lock was gone before unlock");
            }
            return result;
        }

        if !self
            .lock
            .wait_for_release(&lock_key, settings.max_wait, settings.poll_interval)
            .await
        {
            debug!(%lock_key, "idempotency: lock still held after max wait");
        }

        match lookup().await.map_err(ContentionError::Lookup)? {
            Some(found) => Ok(found),
            None => Err(ContentionError::ConcurrencyTimeout {
                resource_key: resource_key.to_string(),
            }),
        }
    }
}
