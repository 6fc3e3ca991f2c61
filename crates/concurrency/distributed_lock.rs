use std::{sync::Arc, time::Duration};

use tokio::time::{Instant, sleep};
use tracing::warn;
use uuid::Uuid;

use crate::domain::repositories::lock_store::LockStore;

/// Mutual exclusion across processes through the shared lock store.
///
/// Store errors never surface to callers: they read as "lock unavailable".
/// Locks are never renewed, so the TTL must outlast the guarded work.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn LockStore + Send + Sync>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn LockStore + Send + Sync>) -> Self {
        Self { store }
    }

    pub fn new_holder_token() -> String {
        Uuid::new_v4().to_string()
    }

    pub async fn try_lock(&self, key: &str, holder_token: &str, ttl: Duration) -> bool {
        match self.store.set_if_absent(key, holder_token, ttl).await {
            Ok(acquired) => acquired,
            Err(err) => {
                warn!(key, error = ?err, "distributed_lock: acquire failed, treating as held");
                false
            }
        }
    }

    pub async fn unlock(&self, key: &str, holder_token: &str) -> bool {
        match self.store.delete_if_equals(key, holder_token).await {
            Ok(released) => released,
            Err(err) => {
                warn!(key, error = ?err, "distributed_lock: release failed");
                false
            }
        }
    }

    /// Polls until the key disappears or `max_wait` elapses.
    pub async fn wait_for_release(
        &self,
        key: &str,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            match self.store.exists(key).await {
                Ok(false) => return true,
                Ok(true) => {}
                Err(err) => {
                    warn!(key, error = ?err, "distributed_lock: poll failed, still waiting");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            sleep(poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::repositories::lock_store::MockLockStore, infra::kv::memory_store::MemoryStore,
    };
    use anyhow::anyhow;

    fn memory_lock() -> DistributedLock {
        DistributedLock::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn second_holder_is_excluded_until_unlock() {
        let lock = memory_lock();
        let ttl = Duration::from_secs(10);

        assert!(lock.try_lock("lock:apple", "a", ttl).await);
        assert!(!lock.try_lock("lock:apple", "b", ttl).await);
        assert!(lock.unlock("lock:apple", "a").await);
        assert!(lock.try_lock("lock:apple", "b", ttl).await);
    }

    #[tokio::test]
    async fn lock_expires_after_ttl() {
        let lock = memory_lock();

        assert!(lock.try_lock("lock:k", "a", Duration::from_millis(30)).await);
        sleep(Duration::from_millis(60)).await;
        assert!(lock.try_lock("lock:k", "b", Duration::from_secs(10)).await);
    }

    #[tokio::test]
    async fn unlock_with_foreign_token_keeps_the_key() {
        let lock = memory_lock();

        assert!(lock.try_lock("lock:k", "owner", Duration::from_secs(10)).await);
        assert!(!lock.unlock("lock:k", "intruder").await);
        assert!(!lock.try_lock("lock:k", "other", Duration::from_secs(10)).await);
    }

    #[tokio::test]
    async fn wait_for_release_sees_unlock_from_another_task() {
        let lock = memory_lock();
        assert!(lock.try_lock("lock:k", "owner", Duration::from_secs(10)).await);

        let holder = lock.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            holder.unlock("lock:k", "owner").await;
        });

        assert!(
            lock.wait_for_release("lock:k", Duration::from_secs(2), Duration::from_millis(5))
                .await
        );
    }

    #[tokio::test]
    async fn wait_for_release_gives_up_after_max_wait() {
        let lock = memory_lock();
        assert!(lock.try_lock("lock:k", "owner", Duration::from_secs(10)).await);

        assert!(
            !lock
                .wait_for_release("lock:k", Duration::from_millis(30), Duration::from_millis(5))
                .await
        );
    }

    #[tokio::test]
    async fn store_errors_read_as_unavailable() {
        let mut store = MockLockStore::new();
        store
            .expect_set_if_absent()
            .returning(|_, _, _| Err(anyhow!("connection refused")));
        store
            .expect_delete_if_equals()
            .returning(|_, _| Err(anyhow!("connection refused")));
        store
            .expect_exists()
            .returning(|_| Err(anyhow!("connection refused")));
        let lock = DistributedLock::new(Arc::new(store));

        assert!(!lock.try_lock("k", "t", Duration::from_secs(1)).await);
        assert!(!lock.unlock("k", "t").await);
        assert!(
            !lock
                .wait_for_release("k", Duration::from_millis(20), Duration::from_millis(5))
                .await
        );
    }
}
