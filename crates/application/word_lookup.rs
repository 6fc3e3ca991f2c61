use std::sync::Arc;

use http::StatusCode;
use thiserror::Error;
use tracing::{error, info};

use crate::{
    concurrency::idempotency::{ContentionError, ContentionSettings, IdempotencyGuard},
    domain::{
        entities::words::InsertWordEntity,
        repositories::{dictionary::DictionaryClient, words::WordRepository},
        value_objects::words::{WordDto, normalize_word},
    },
};

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("nothing found for {0}")]
    NotFound(String),
    #[error("another request is producing {0}, retry shortly")]
    Busy(String),
    #[error("upstream lookup failed")]
    Upstream(#[source] anyhow::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl LookupError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            LookupError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            LookupError::NotFound(_) => StatusCode::NOT_FOUND,
            LookupError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            LookupError::Upstream(_) => StatusCode::BAD_GATEWAY,
            LookupError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Marker carried through `compute_once` when the upstream source has no entry.
#[derive(Debug, Error)]
#[error("no entry for {0}")]
pub(crate) struct MissingUpstream(pub(crate) String);

impl From<ContentionError> for LookupError {
    fn from(err: ContentionError) -> Self {
        match err {
            ContentionError::ConcurrencyTimeout { resource_key } => LookupError::Busy(resource_key),
            ContentionError::Lookup(err) => LookupError::Internal(err),
            ContentionError::Compute(err) => match err.downcast::<MissingUpstream>() {
                Ok(MissingUpstream(what)) => LookupError::NotFound(what),
                Err(err) => LookupError::Upstream(err),
            },
        }
    }
}

pub struct WordLookupUseCase {
    word_repository: Arc<dyn WordRepository + Send + Sync>,
    dictionary: Arc<dyn DictionaryClient + Send + Sync>,
    idempotency: IdempotencyGuard,
    settings: ContentionSettings,
}

impl WordLookupUseCase {
    pub fn new(
        word_repository: Arc<dyn WordRepository + Send + Sync>,
        dictionary: Arc<dyn DictionaryClient + Send + Sync>,
        idempotency: IdempotencyGuard,
        settings: ContentionSettings,
    ) -> Self {
        Self {
            word_repository,
            dictionary,
            idempotency,
            settings,
        }
    }

    /// Returns the stored word, fetching it from the dictionary once when it
    /// is missing no matter how many callers ask at the same time.
    pub async fn lookup(&self, raw: &str) -> Result<WordDto, LookupError> {
        let text =
            normalize_word(raw).ok_or_else(|| LookupError::InvalidInput(raw.to_string()))?;
        let text = text.as_str();
        let words = &self.word_repository;
        let dictionary = &self.dictionary;

        let word = self
            .idempotency
            .compute_once(
                &format!("word:{text}"),
                &self.settings,
                move || words.find_by_text(text),
                move || async move {
                    let definition = dictionary
                        .lookup(text)
                        .await?
                        .ok_or_else(|| anyhow::Error::new(MissingUpstream(text.to_string())))?;
                    let stored = words
                        .insert(InsertWordEntity {
                            text: text.to_string(),
                            definition: definition.definition,
                            phonetic: definition.phonetic,
                        })
                        .await?;
                    info!(word = %stored.text, "word_lookup: stored new word");
                    Ok::<_, anyhow::Error>(stored)
                },
            )
            .await
            .map_err(|err| {
                let err = LookupError::from(err);
                if matches!(err, LookupError::Upstream(_) | LookupError::Internal(_)) {
                    error!(word = %text, error = ?err, "word_lookup: lookup failed");
                }
                err
            })?;

        Ok(word.into())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::{
        concurrency::distributed_lock::DistributedLock,
        domain::{
            entities::words::WordEntity, repositories::dictionary::MockDictionaryClient,
            value_objects::words::WordDefinition,
        },
        infra::kv::memory_store::MemoryStore,
    };

    #[derive(Default)]
    struct InMemoryWords {
        rows: Mutex<HashMap<String, WordEntity>>,
    }

    #[async_trait]
    impl WordRepository for InMemoryWords {
        async fn find_by_text(&self, text: &str) -> Result<Option<WordEntity>> {
            Ok(self.rows.lock().unwrap().get(text).cloned())
        }

        async fn insert(&self, word: InsertWordEntity) -> Result<WordEntity> {
            let mut rows = self.rows.lock().unwrap();
            let stored = rows.entry(word.text.clone()).or_insert_with(|| WordEntity {
                id: Uuid::new_v4(),
                text: word.text,
                definition: word.definition,
                phonetic: word.phonetic,
                created_at: Utc::now(),
            });
            Ok(stored.clone())
        }
    }

    fn usecase(dictionary: MockDictionaryClient) -> WordLookupUseCase {
        WordLookupUseCase::new(
            Arc::new(InMemoryWords::default()),
            Arc::new(dictionary),
            IdempotencyGuard::new(DistributedLock::new(Arc::new(MemoryStore::new()))),
            ContentionSettings::default(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lookups_call_dictionary_once() {
        let mut dictionary = MockDictionaryClient::new();
        dictionary.expect_lookup().times(1).returning(|word| {
            Ok(Some(WordDefinition {
                text: word.to_string(),
                definition: "the round fruit of a tree".to_string(),
                phonetic: Some("/ˈæp.əl/".to_string()),
            }))
        });
        let usecase = Arc::new(usecase(dictionary));

        let first = tokio::spawn({
            let usecase = Arc::clone(&usecase);
            async move { usecase.lookup("apple").await }
        });
        let second = tokio::spawn({
            let usecase = Arc::clone(&usecase);
            async move { usecase.lookup("Apple ").await }
        });

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.text, "apple");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unknown_word_is_not_found() {
        let mut dictionary = MockDictionaryClient::new();
        dictionary.expect_lookup().returning(|_| Ok(None));

        let err = usecase(dictionary).lookup("qwzx").await.unwrap_err();
        assert!(matches!(err, LookupError::NotFound(ref word) if word == "qwzx"));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_dictionary() {
        let mut dictionary = MockDictionaryClient::new();
        dictionary.expect_lookup().never();

        let err = usecase(dictionary).lookup("  ").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn dictionary_outage_maps_to_bad_gateway() {
        let mut dictionary = MockDictionaryClient::new();
        dictionary
            .expect_lookup()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));

        let err = usecase(dictionary).lookup("pear").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
}
