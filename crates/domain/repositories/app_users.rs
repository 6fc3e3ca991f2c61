use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

#[automock]
#[async_trait]
pub trait AppUserRepository {
    async fn find_email(&self, account_id: Uuid) -> Result<Option<String>>;
}
