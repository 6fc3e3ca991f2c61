use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{RunQueryDsl, dsl::exists, prelude::*, select, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{
        postgres_connection::PgPoolSquad,
        schema::{plans, subscriptions},
        unit_of_work::{TxOutcome, run_blocking, run_in_transaction},
    },
};
use domain::{
    entities::{plans::PlanEntity, subscriptions::SubscriptionEntity},
    repositories::subscriptions::SubscriptionRepository,
    value_objects::enums::subscription_statuses::SubscriptionStatus,
};

pub struct SubscriptionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SubscriptionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl SubscriptionRepository for SubscriptionPostgres {
    async fn find_current(
        &self,
        account_id: Uuid,
    ) -> Result<Option<(SubscriptionEntity, PlanEntity)>> {
        run_blocking(Arc::clone(&self.db_pool), move |conn| {
            let result = subscriptions::table
                .inner_join(plans::table)
                .filter(subscriptions::account_id.eq(account_id))
                .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
                .order(subscriptions::expired_at.desc())
                .select((SubscriptionEntity::as_select(), PlanEntity::as_select()))
                .first::<(SubscriptionEntity, PlanEntity)>(conn)
                .optional()?;
            Ok(result)
        })
        .await
    }

    async fn expire_lapsed(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        run_in_transaction(Arc::clone(&self.db_pool), move |conn| {
            let affected = update(
                subscriptions::table
                    .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
                    .filter(subscriptions::expired_at.lt(cutoff)),
            )
            .set((
                subscriptions::status.eq(SubscriptionStatus::Expired.as_str()),
                subscriptions::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
            Ok(TxOutcome::Commit(affected))
        })
        .await
    }

    async fn find_auto_renew_due(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<SubscriptionEntity>> {
        run_blocking(Arc::clone(&self.db_pool), move |conn| {
            let results = subscriptions::table
                .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
                .filter(subscriptions::auto_renew.eq(true))
                .filter(subscriptions::expired_at.ge(from))
                .filter(subscriptions::expired_at.lt(until))
                .order(subscriptions::expired_at.asc())
                .select(SubscriptionEntity::as_select())
                .load::<SubscriptionEntity>(conn)?;
            Ok(results)
        })
        .await
    }

    async fn enable_auto_renew(&self, account_id: Uuid) -> Result<bool> {
        run_in_transaction(Arc::clone(&self.db_pool), move |conn| {
            let current = subscriptions::table
                .filter(subscriptions::account_id.eq(account_id))
                .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
                .order(subscriptions::expired_at.desc())
                .select(subscriptions::id)
                .for_update()
                .first::<Uuid>(conn)
                .optional()?;

            let Some(subscription_id) = current else {
                return Ok(TxOutcome::Commit(false));
            };

            update(subscriptions::table.find(subscription_id))
                .set((
                    subscriptions::auto_renew.eq(true),
                    subscriptions::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;

            Ok(TxOutcome::Commit(true))
        })
        .await
    }

    async fn has_active_after(&self, account_id: Uuid, after: DateTime<Utc>) -> Result<bool> {
        run_blocking(Arc::clone(&self.db_pool), move |conn| {
            let result = select(exists(
                subscriptions::table
                    .filter(subscriptions::account_id.eq(account_id))
                    .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
                    .filter(subscriptions::expired_at.gt(after)),
            ))
            .get_result::<bool>(conn)?;
            Ok(result)
        })
        .await
    }
}
