use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::value_objects::enums::payment_statuses::PaymentStatus,
    infra::db::postgres::schema::payments,
};

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = payments)]
pub struct PaymentEntity {
    pub id: Uuid,
    pub account_id: Uuid,
    pub plan_id: Uuid,
    pub order_id: String,
    pub payment_key: Option<String>,
    pub billing_key: Option<String>,
    pub customer_key: Option<String>,
    pub total_amount: i64,
    pub status: String,
    pub method: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub receipt_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentEntity {
    /// Unknown stored values are read as `ABORTED` so that no transition can
    /// start from a row this code does not understand.
    pub fn status(&self) -> PaymentStatus {
        PaymentStatus::from_str(&self.status).unwrap_or(PaymentStatus::Aborted)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = payments)]
pub struct InsertPaymentEntity {
    pub account_id: Uuid,
    pub plan_id: Uuid,
    pub order_id: String,
    pub billing_key: Option<String>,
    pub customer_key: Option<String>,
    pub total_amount: i64,
    pub status: String,
}
