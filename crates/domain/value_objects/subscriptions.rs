use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{
    entities::{plans::PlanEntity, subscriptions::SubscriptionEntity},
    value_objects::enums::subscription_statuses::SubscriptionStatus,
};

#[derive(Debug, Serialize, PartialEq)]
pub struct CurrentSubscriptionDto {
    pub subscription_id: Uuid,
    pub plan_id: Uuid,
    pub plan_name: String,
    pub status: SubscriptionStatus,
    pub started_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
    pub auto_renew: bool,
}

impl CurrentSubscriptionDto {
    pub fn from_parts(subscription: SubscriptionEntity, plan: PlanEntity) -> Self {
        Self {
            subscription_id: subscription.id,
            plan_id: plan.id,
            plan_name: plan.name,
            status: SubscriptionStatus::from_str(&subscription.status),
            started_at: subscription.started_at,
            expired_at: subscription.expired_at,
            auto_renew: subscription.auto_renew,
        }
    }
}
