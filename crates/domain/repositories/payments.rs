use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::{
    entities::payments::{InsertPaymentEntity, PaymentEntity},
    value_objects::payments::{
        CompletionOutcome, FailureStage, PaymentApproval, TransitionOutcome,
    },
};

/// Persistence for payment rows. Every method that changes `status` runs as
/// one transaction holding a row lock and refuses backward transitions.
#[automock]
#[async_trait]
pub trait PaymentRepository {
    async fn insert(&self, payment: InsertPaymentEntity) -> Result<PaymentEntity>;

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<PaymentEntity>>;

    /// Latest row of the account that carries a billing key.
    async fn find_latest_billing_key(&self, account_id: Uuid) -> Result<Option<PaymentEntity>>;

    /// `READY -> IN_PROGRESS`, recording the gateway payment key.
    async fn mark_in_progress(&self, order_id: &str, payment_key: &str)
    -> Result<TransitionOutcome>;

    /// `IN_PROGRESS -> DONE`, grants the subscription period and resolves the
    /// resulting entitlement in the same transaction.
    async fn complete(&self, order_id: &str, approval: PaymentApproval)
    -> Result<CompletionOutcome>;

    /// `READY -> AUTO_BILLING_READY`, storing the issued billing key.
    async fn mark_billing_ready(
        &self,
        order_id: &str,
        billing_key: &str,
        customer_key: &str,
    ) -> Result<TransitionOutcome>;

    /// `AUTO_BILLING_READY -> AUTO_BILLING_APPROVED`, granting a renewal period
    /// that starts at `renew_from`.
    async fn approve_auto_billing(
        &self,
        order_id: &str,
        approval: PaymentApproval,
        renew_from: DateTime<Utc>,
    ) -> Result<CompletionOutcome>;

    /// Moves a non-terminal row to `FAILED`/`ABORTED` under `SELECT ... FOR UPDATE`.
    /// A row that is already terminal is left untouched and reported as rejected.
    async fn finalize_failure(
        &self,
        order_id: &str,
        stage: FailureStage,
        reason: &str,
    ) -> Result<TransitionOutcome>;
}
