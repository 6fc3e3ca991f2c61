use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::payment_histories::InsertPaymentHistoryEntity;

#[automock]
#[async_trait]
pub trait PaymentHistoryRepository {
    async fn append(&self, history: InsertPaymentHistoryEntity) -> Result<Uuid>;
}
