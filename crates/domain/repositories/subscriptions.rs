use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::{plans::PlanEntity, subscriptions::SubscriptionEntity};

#[automock]
#[async_trait]
pub trait SubscriptionRepository {
    /// The `ACTIVE` row with the latest `expired_at`, joined to its plan.
    async fn find_current(
        &self,
        account_id: Uuid,
    ) -> Result<Option<(SubscriptionEntity, PlanEntity)>>;

    /// Set-based `ACTIVE -> EXPIRED` for every row with `expired_at < cutoff`.
    async fn expire_lapsed(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// `ACTIVE` rows with auto-renew enabled and `from <= expired_at < until`.
    async fn find_auto_renew_due(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<SubscriptionEntity>>;

    /// Turns auto-renew on for the account's current subscription.
    async fn enable_auto_renew(&self, account_id: Uuid) -> Result<bool>;

    async fn has_active_after(&self, account_id: Uuid, after: DateTime<Utc>) -> Result<bool>;
}
