use std::{sync::Arc, time::Duration};

use anyhow::Context;
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use super::word_lookup::{LookupError, MissingUpstream};
use crate::{
    concurrency::idempotency::{ContentionSettings, IdempotencyGuard},
    domain::{
        repositories::{cache_store::CacheStore, video_search::VideoSearchClient},
        value_objects::videos::VideoSummary,
    },
};

const MAX_QUERY_LEN: usize = 128;

pub fn video_cache_key(query: &str) -> String {
    let digest = Sha256::digest(query.as_bytes());
    format!("videos:{}", hex::encode(digest))
}

fn normalize_query(raw: &str) -> Option<String> {
    let query = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    if query.is_empty() || query.len() > MAX_QUERY_LEN {
        return None;
    }
    Some(query)
}

pub struct VideoListUseCase {
    cache: Arc<dyn CacheStore + Send + Sync>,
    search: Arc<dyn VideoSearchClient + Send + Sync>,
    idempotency: IdempotencyGuard,
    settings: ContentionSettings,
    cache_ttl: Duration,
}

impl VideoListUseCase {
    pub fn new(
        cache: Arc<dyn CacheStore + Send + Sync>,
        search: Arc<dyn VideoSearchClient + Send + Sync>,
        idempotency: IdempotencyGuard,
        settings: ContentionSettings,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            search,
            idempotency,
            settings,
            cache_ttl,
        }
    }

    pub async fn list(&self, raw_query: &str) -> Result<Vec<VideoSummary>, LookupError> {
        let query = normalize_query(raw_query)
            .ok_or_else(|| LookupError::InvalidInput(raw_query.to_string()))?;
        let query = query.as_str();
        let key = video_cache_key(query);
        let key = key.as_str();
        let cache = &self.cache;
        let search = &self.search;
        let ttl = self.cache_ttl;

        self.idempotency
            .compute_once(
                key,
                &self.settings,
                move || async move {
                    match cache.get(key).await? {
                        Some(cached) => {
                            let videos: Vec<VideoSummary> = serde_json::from_str(&cached)
                                .context("video_lists: corrupt cache entry")?;
                            debug!(%query, "video_lists: cache hit");
                            Ok::<_, anyhow::Error>(Some(videos))
                        }
                        None => Ok(None),
                    }
                },
                move || async move {
                    let videos = search.search(query).await?;
                    if videos.is_empty() {
                        return Err(anyhow::Error::new(MissingUpstream(query.to_string())));
                    }
                    let encoded = serde_json::to_string(&videos)?;
                    cache.set(key, &encoded, ttl).await?;
                    Ok::<_, anyhow::Error>(videos)
                },
            )
            .await
            .map_err(|err| {
                let err = LookupError::from(err);
                if matches!(err, LookupError::Upstream(_) | LookupError::Internal(_)) {
                    error!(%query, error = ?err, "video_lists: listing failed");
                }
                err
            })
    }
}
