use async_trait::async_trait;
use mockall::automock;
use thiserror::Error;

use crate::domain::value_objects::payments::PaymentApproval;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("gateway request timed out")]
    Timeout,
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    /// Whether the gateway may have acted on the request despite the error.
    pub fn outcome_unknown(&self) -> bool {
        !matches!(self, GatewayError::Rejected { .. })
    }
}

/// Third-party payment gateway. None of these calls may run inside a
/// database transaction.
#[automock]
#[async_trait]
pub trait PaymentGateway {
    async fn confirm_payment(
        &self,
        payment_key: &str,
        order_id: &str,
        amount: i64,
    ) -> Result<PaymentApproval, GatewayError>;

    async fn issue_billing_key(
        &self,
        customer_key: &str,
        auth_key: &str,
        order_id: &str,
    ) -> Result<String, GatewayError>;

    async fn charge_billing_key(
        &self,
        billing_key: &str,
        customer_key: &str,
        order_id: &str,
        amount: i64,
    ) -> Result<PaymentApproval, GatewayError>;

    async fn cancel_payment(&self, payment_key: &str, reason: &str) -> Result<(), GatewayError>;
}
