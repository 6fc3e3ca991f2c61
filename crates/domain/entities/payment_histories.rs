use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::payment_histories;

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = payment_histories)]
pub struct PaymentHistoryEntity {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub status: String,
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = payment_histories)]
pub struct InsertPaymentHistoryEntity {
    pub payment_id: Uuid,
    pub status: String,
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
