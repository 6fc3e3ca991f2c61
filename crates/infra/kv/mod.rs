pub mod memory_store;
pub mod redis_store;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tracing::{info, warn};

use crate::domain::repositories::{cache_store::CacheStore, lock_store::LockStore};
use memory_store::MemoryStore;
use redis_store::RedisStore;

pub struct KvStores {
    pub lock_store: Arc<dyn LockStore + Send + Sync>,
    pub cache_store: Arc<dyn CacheStore + Send + Sync>,
}

/// Redis when a URL is configured. Without one, locks only exclude callers
/// inside this process.
pub fn connect_stores(redis_url: Option<&str>, op_timeout: Duration) -> Result<KvStores> {
    match redis_url {
        Some(url) => {
            let store = Arc::new(RedisStore::new(url, op_timeout)?);
            info!("kv: using redis lock and cache store");
            Ok(KvStores {
                lock_store: store.clone(),
                cache_store: store,
            })
        }
        None => {
            warn!("kv: REDIS_URL not set, falling back to in-process lock store");
            let store = Arc::new(MemoryStore::new());
            Ok(KvStores {
                lock_store: store.clone(),
                cache_store: store,
            })
        }
    }
}
