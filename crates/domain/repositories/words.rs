use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

use crate::domain::entities::words::{InsertWordEntity, WordEntity};

#[automock]
#[async_trait]
pub trait WordRepository {
    async fn find_by_text(&self, text: &str) -> Result<Option<WordEntity>>;

    /// Inserts the word, or returns the stored row if another writer got there first.
    async fn insert(&self, word: InsertWordEntity) -> Result<WordEntity>;
}
