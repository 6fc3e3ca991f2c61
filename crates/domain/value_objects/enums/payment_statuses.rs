use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Lifecycle of a single payment attempt.
///
/// A row only ever moves forward through this machine. Retrying a payment
/// means creating a new row, never rewinding an existing one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Ready,
    InProgress,
    Done,
    Failed,
    Aborted,
    AutoBillingReady,
    AutoBillingApproved,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Ready => "READY",
            PaymentStatus::InProgress => "IN_PROGRESS",
            PaymentStatus::Done => "DONE",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Aborted => "ABORTED",
            PaymentStatus::AutoBillingReady => "AUTO_BILLING_READY",
            PaymentStatus::AutoBillingApproved => "AUTO_BILLING_APPROVED",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "READY" => Some(PaymentStatus::Ready),
            "IN_PROGRESS" => Some(PaymentStatus::InProgress),
            "DONE" => Some(PaymentStatus::Done),
            "FAILED" => Some(PaymentStatus::Failed),
            "ABORTED" => Some(PaymentStatus::Aborted),
            "AUTO_BILLING_READY" => Some(PaymentStatus::AutoBillingReady),
            "AUTO_BILLING_APPROVED" => Some(PaymentStatus::AutoBillingApproved),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Done
                | PaymentStatus::Failed
                | PaymentStatus::Aborted
                | PaymentStatus::AutoBillingApproved
        )
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;

        matches!(
            (self, next),
            (Ready, InProgress)
                | (Ready, AutoBillingReady)
                | (Ready, Aborted)
                | (InProgress, Done)
                | (InProgress, Failed)
                | (InProgress, Aborted)
                | (AutoBillingReady, AutoBillingApproved)
                | (AutoBillingReady, Failed)
                | (AutoBillingReady, Aborted)
        )
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
