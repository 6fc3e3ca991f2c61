use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel::{PgConnection, RunQueryDsl, dsl::max, insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{
        postgres_connection::PgPoolSquad,
        schema::{payments, plans, subscriptions},
        unit_of_work::{TxOutcome, run_blocking, run_in_transaction},
    },
};
use domain::{
    entities::{
        payments::{InsertPaymentEntity, PaymentEntity},
        plans::PlanEntity,
        subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
    },
    repositories::payments::PaymentRepository,
    value_objects::{
        enums::{payment_statuses::PaymentStatus, subscription_statuses::SubscriptionStatus},
        payments::{
            CompletionOutcome, Entitlement, FailureStage, PaymentApproval, TransitionOutcome,
        },
    },
};

pub struct PaymentPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl PaymentPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

fn lock_payment(conn: &mut PgConnection, order_id: &str) -> Result<PaymentEntity> {
    payments::table
        .filter(payments::order_id.eq(order_id))
        .select(PaymentEntity::as_select())
        .for_update()
        .first::<PaymentEntity>(conn)
        .optional()?
        .ok_or_else(|| anyhow!("payments: order {order_id} does not exist"))
}

/// The account's current entitlement: its `ACTIVE` subscription with the
/// latest expiry, joined to the plan it grants.
pub(crate) fn resolve_entitlement(
    conn: &mut PgConnection,
    account_id: Uuid,
) -> Result<Option<Entitlement>> {
    let current = subscriptions::table
        .inner_join(plans::table)
        .filter(subscriptions::account_id.eq(account_id))
        .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
        .order(subscriptions::expired_at.desc())
        .select((SubscriptionEntity::as_select(), PlanEntity::as_select()))
        .first::<(SubscriptionEntity, PlanEntity)>(conn)
        .optional()?;

    Ok(current.map(|(subscription, plan)| Entitlement {
        subscription_id: subscription.id,
        plan_id: plan.id,
        plan_name: plan.name,
        started_at: subscription.started_at,
        expired_at: subscription.expired_at,
    }))
}

/// Moves a locked row to `target`, records the approval and grants one plan
/// period. Rolls back when the plan or the resulting entitlement cannot be read.
fn grant_period(
    conn: &mut PgConnection,
    order_id: &str,
    approval: PaymentApproval,
    target: PaymentStatus,
    renew_from: Option<DateTime<Utc>>,
) -> Result<TxOutcome<CompletionOutcome>> {
    let row = lock_payment(conn, order_id)?;
    let current = row.status();

    if current == target {
        let entitlement = resolve_entitlement(conn, row.account_id)?;
        return Ok(TxOutcome::Commit(CompletionOutcome::AlreadyCompleted {
            payment: row,
            entitlement,
        }));
    }
    if !current.can_transition_to(target) {
        return Ok(TxOutcome::Commit(CompletionOutcome::Rejected { current }));
    }

    let now = Utc::now();
    let payment = update(payments::table.find(row.id))
        .set((
            payments::status.eq(target.as_str()),
            payments::payment_key.eq(Some(approval.payment_key)),
            payments::method.eq(Some(approval.method)),
            payments::approved_at.eq(Some(approval.approved_at)),
            payments::receipt_url.eq(approval.receipt_url),
            payments::updated_at.eq(now),
        ))
        .returning(PaymentEntity::as_returning())
        .get_result::<PaymentEntity>(conn)?;

    let Some(plan) = plans::table
        .find(payment.plan_id)
        .select(PlanEntity::as_select())
        .first::<PlanEntity>(conn)
        .optional()?
    else {
        return Ok(TxOutcome::Rollback(CompletionOutcome::GrantMissing));
    };

    let started_at = match renew_from {
        Some(from) => from,
        None => {
            let current_expiry = subscriptions::table
                .filter(subscriptions::account_id.eq(payment.account_id))
                .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
                .select(max(subscriptions::expired_at))
                .first::<Option<DateTime<Utc>>>(conn)?;
            current_expiry.map_or(now, |expiry| expiry.max(now))
        }
    };

    insert_into(subscriptions::table)
        .values(&InsertSubscriptionEntity {
            account_id: payment.account_id,
            plan_id: plan.id,
            payment_id: Some(payment.id),
            started_at,
            expired_at: started_at + Duration::days(i64::from(plan.duration_days)),
            status: SubscriptionStatus::Active.to_string(),
            auto_renew: renew_from.is_some(),
        })
        .execute(conn)?;

    match resolve_entitlement(conn, payment.account_id)? {
        Some(entitlement) => Ok(TxOutcome::Commit(CompletionOutcome::Granted {
            payment,
            entitlement,
        })),
        None => Ok(TxOutcome::Rollback(CompletionOutcome::GrantMissing)),
    }
}

#[async_trait]
impl PaymentRepository for PaymentPostgres {
    async fn insert(&self, payment: InsertPaymentEntity) -> Result<PaymentEntity> {
        run_blocking(Arc::clone(&self.db_pool), move |conn| {
            let result = insert_into(payments::table)
                .values(&payment)
                .returning(PaymentEntity::as_returning())
                .get_result::<PaymentEntity>(conn)?;
            Ok(result)
        })
        .await
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<PaymentEntity>> {
        let order_id = order_id.to_string();
        run_blocking(Arc::clone(&self.db_pool), move |conn| {
            let result = payments::table
                .filter(payments::order_id.eq(order_id))
                .select(PaymentEntity::as_select())
                .first::<PaymentEntity>(conn)
                .optional()?;
            Ok(result)
        })
        .await
    }

    async fn find_latest_billing_key(&self, account_id: Uuid) -> Result<Option<PaymentEntity>> {
        run_blocking(Arc::clone(&self.db_pool), move |conn| {
            let result = payments::table
                .filter(payments::account_id.eq(account_id))
                .filter(payments::billing_key.is_not_null())
                .order(payments::created_at.desc())
                .select(PaymentEntity::as_select())
                .first::<PaymentEntity>(conn)
                .optional()?;
            Ok(result)
        })
        .await
    }

    async fn mark_in_progress(
        &self,
        order_id: &str,
        payment_key: &str,
    ) -> Result<TransitionOutcome> {
        let order_id = order_id.to_string();
        let payment_key = payment_key.to_string();
        run_in_transaction(Arc::clone(&self.db_pool), move |conn| {
            let row = lock_payment(conn, &order_id)?;
            let current = row.status();
            if !current.can_transition_to(PaymentStatus::InProgress) {
                return Ok(TxOutcome::Commit(TransitionOutcome::Rejected { current }));
            }

            let payment = update(payments::table.find(row.id))
                .set((
                    payments::status.eq(PaymentStatus::InProgress.as_str()),
                    payments::payment_key.eq(Some(payment_key)),
                    payments::updated_at.eq(Utc::now()),
                ))
                .returning(PaymentEntity::as_returning())
                .get_result::<PaymentEntity>(conn)?;

            Ok(TxOutcome::Commit(TransitionOutcome::Applied(payment)))
        })
        .await
    }

    async fn complete(
        &self,
        order_id: &str,
        approval: PaymentApproval,
    ) -> Result<CompletionOutcome> {
        let order_id = order_id.to_string();
        run_in_transaction(Arc::clone(&self.db_pool), move |conn| {
            grant_period(conn, &order_id, approval, PaymentStatus::Done, None)
        })
        .await
    }

    async fn mark_billing_ready(
        &self,
        order_id: &str,
        billing_key: &str,
        customer_key: &str,
    ) -> Result<TransitionOutcome> {
        let order_id = order_id.to_string();
        let billing_key = billing_key.to_string();
        let customer_key = customer_key.to_string();
        run_in_transaction(Arc::clone(&self.db_pool), move |conn| {
            let row = lock_payment(conn, &order_id)?;
            let current = row.status();
            if !current.can_transition_to(PaymentStatus::AutoBillingReady) {
                return Ok(TxOutcome::Commit(TransitionOutcome::Rejected { current }));
            }

            let payment = update(payments::table.find(row.id))
                .set((
                    payments::status.eq(PaymentStatus::AutoBillingReady.as_str()),
                    payments::billing_key.eq(Some(billing_key)),
                    payments::customer_key.eq(Some(customer_key)),
                    payments::updated_at.eq(Utc::now()),
                ))
                .returning(PaymentEntity::as_returning())
                .get_result::<PaymentEntity>(conn)?;

            Ok(TxOutcome::Commit(TransitionOutcome::Applied(payment)))
        })
        .await
    }

    async fn approve_auto_billing(
        &self,
        order_id: &str,
        approval: PaymentApproval,
        renew_from: DateTime<Utc>,
    ) -> Result<CompletionOutcome> {
        let order_id = order_id.to_string();
        run_in_transaction(Arc::clone(&self.db_pool), move |conn| {
            grant_period(
                conn,
                &order_id,
                approval,
                PaymentStatus::AutoBillingApproved,
                Some(renew_from),
            )
        })
        .await
    }

    async fn finalize_failure(
        &self,
        order_id: &str,
        stage: FailureStage,
        reason: &str,
    ) -> Result<TransitionOutcome> {
        let order_id = order_id.to_string();
        let reason = reason.to_string();
        run_in_transaction(Arc::clone(&self.db_pool), move |conn| {
            let row = lock_payment(conn, &order_id)?;
            let current = row.status();
            let target = stage.terminal_status(current);
            if !current.can_transition_to(target) {
                return Ok(TxOutcome::Commit(TransitionOutcome::Rejected { current }));
            }

            let payment = update(payments::table.find(row.id))
                .set((
                    payments::status.eq(target.as_str()),
                    payments::failure_reason.eq(Some(reason)),
                    payments::updated_at.eq(Utc::now()),
                ))
                .returning(PaymentEntity::as_returning())
                .get_result::<PaymentEntity>(conn)?;

            Ok(TxOutcome::Commit(TransitionOutcome::Applied(payment)))
        })
        .await
    }
}
