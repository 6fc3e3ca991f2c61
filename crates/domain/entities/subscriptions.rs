use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::subscriptions;

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = subscriptions)]
pub struct SubscriptionEntity {
    pub id: Uuid,
    pub account_id: Uuid,
    pub plan_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
    pub status: String,
    pub auto_renew: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = subscriptions)]
pub struct InsertSubscriptionEntity {
    pub account_id: Uuid,
    pub plan_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
    pub status: String,
    pub auto_renew: bool,
}
