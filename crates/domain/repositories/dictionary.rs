use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

use crate::domain::value_objects::words::WordDefinition;

#[automock]
#[async_trait]
pub trait DictionaryClient {
    async fn lookup(&self, word: &str) -> Result<Option<WordDefinition>>;
}
