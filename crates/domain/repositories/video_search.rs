use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

use crate::domain::value_objects::videos::VideoSummary;

#[automock]
#[async_trait]
pub trait VideoSearchClient {
    async fn search(&self, query: &str) -> Result<Vec<VideoSummary>>;
}
