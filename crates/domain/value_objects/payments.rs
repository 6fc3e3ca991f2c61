use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    entities::payments::PaymentEntity, value_objects::enums::payment_statuses::PaymentStatus,
};

/// What the gateway reports once it has approved a charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentApproval {
    pub payment_key: String,
    pub method: String,
    pub approved_at: DateTime<Utc>,
    pub receipt_url: Option<String>,
}

/// The account's entitlement after a payment has been granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entitlement {
    pub subscription_id: Uuid,
    pub plan_id: Uuid,
    pub plan_name: String,
    pub started_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// Result of a guarded status transition executed under a row lock.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Applied(PaymentEntity),
    Rejected { current: PaymentStatus },
}

/// Result of the complete phase. `GrantMissing` means the transaction was
/// rolled back and the row kept its previous status.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    Granted {
        payment: PaymentEntity,
        entitlement: Entitlement,
    },
    AlreadyCompleted {
        payment: PaymentEntity,
        entitlement: Option<Entitlement>,
    },
    GrantMissing,
    Rejected {
        current: PaymentStatus,
    },
}

/// Where in the pipeline a payment failed. Decides the terminal status and
/// whether a gateway-side cancel is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// The gateway explicitly declined; nothing was charged.
    GatewayRejected,
    /// The gateway call timed out or errored; a charge may exist.
    GatewayOutcomeUnknown,
    /// The gateway approved but the local completion could not be recorded.
    Completion,
    /// Billing key issuance failed before any charge.
    BillingKeyIssue,
}

impl FailureStage {
    pub fn terminal_status(&self, current: PaymentStatus) -> PaymentStatus {
        match (self, current) {
            (_, PaymentStatus::Ready) => PaymentStatus::Aborted,
            (FailureStage::Completion | FailureStage::BillingKeyIssue, _) => {
                PaymentStatus::Aborted
            }
            _ => PaymentStatus::Failed,
        }
    }

    pub fn requires_compensation(&self) -> bool {
        matches!(
            self,
            FailureStage::GatewayOutcomeUnknown | FailureStage::Completion
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::GatewayRejected => "gateway_rejected",
            FailureStage::GatewayOutcomeUnknown => "gateway_outcome_unknown",
            FailureStage::Completion => "completion",
            FailureStage::BillingKeyIssue => "billing_key_issue",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmPaymentModel {
    pub payment_key: String,
    pub order_id: String,
    pub amount: i64,
}

#[derive(Debug, Clone)]
pub struct ConfirmPaymentCommand {
    pub account_id: Uuid,
    pub idempotency_key: String,
    pub payment_key: String,
    pub order_id: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestPaymentModel {
    pub plan_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueBillingKeyModel {
    pub plan_id: Uuid,
    pub customer_key: String,
    pub auth_key: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentRequestDto {
    pub order_id: String,
    pub amount: i64,
    pub status: PaymentStatus,
}

impl From<&PaymentEntity> for PaymentRequestDto {
    fn from(value: &PaymentEntity) -> Self {
        Self {
            order_id: value.order_id.clone(),
            amount: value.total_amount,
            status: value.status(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentResultDto {
    pub order_id: String,
    pub status: PaymentStatus,
    pub method: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub entitlement: Option<Entitlement>,
}

/// Generates an external order identifier. Assigned once at row creation.
pub fn new_order_id(now: DateTime<Utc>) -> String {
    format!(
        "ORD-{}-{}",
        now.format("%Y%m%d"),
        &Uuid::new_v4().simple().to_string()[..12]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_before_in_progress_abort_without_compensation() {
        let stage = FailureStage::BillingKeyIssue;
        assert_eq!(
            stage.terminal_status(PaymentStatus::Ready),
            PaymentStatus::Aborted
        );
        assert!(!stage.requires_compensation());
    }

    #[test]
    fn unknown_gateway_outcome_fails_and_compensates() {
        let stage = FailureStage::GatewayOutcomeUnknown;
        assert_eq!(
            stage.terminal_status(PaymentStatus::InProgress),
            PaymentStatus::Failed
        );
        assert!(stage.requires_compensation());
    }

    #[test]
    fn completion_failure_aborts_and_compensates() {
        let stage = FailureStage::Completion;
        assert_eq!(
            stage.terminal_status(PaymentStatus::InProgress),
            PaymentStatus::Aborted
        );
        assert!(stage.requires_compensation());
    }

    #[test]
    fn order_ids_are_unique_and_dated() {
        let now = Utc::now();
        let first = new_order_id(now);
        let second = new_order_id(now);
        assert_ne!(first, second);
        assert!(first.starts_with(&format!("ORD-{}-", now.format("%Y%m%d"))));
    }
}
