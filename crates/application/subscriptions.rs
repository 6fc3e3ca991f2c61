use std::{sync::Arc, time::Duration as StdDuration};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use tracing::{error, info, warn};

use super::payments::{PaymentPipeline, RenewalOutcome};
use crate::{
    concurrency::distributed_lock::DistributedLock,
    domain::{
        repositories::subscriptions::SubscriptionRepository,
        value_objects::subscriptions::CurrentSubscriptionDto,
    },
};
use uuid::Uuid;

/// Midnight of the day `now` falls on, in `now`'s own time zone.
pub fn start_of_day<Tz: TimeZone>(now: &DateTime<Tz>) -> Result<DateTime<Utc>> {
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .context("subscriptions: invalid midnight")?;
    let local = now
        .timezone()
        .from_local_datetime(&midnight)
        .earliest()
        .context("subscriptions: midnight does not exist in time zone")?;
    Ok(local.with_timezone(&Utc))
}

pub struct SubscriptionUseCase {
    subscription_repository: Arc<dyn SubscriptionRepository + Send + Sync>,
}

impl SubscriptionUseCase {
    pub fn new(subscription_repository: Arc<dyn SubscriptionRepository + Send + Sync>) -> Self {
        Self {
            subscription_repository,
        }
    }

    pub async fn current_subscription(
        &self,
        account_id: Uuid,
    ) -> Result<Option<CurrentSubscriptionDto>> {
        let current = self.subscription_repository.find_current(account_id).await?;
        Ok(current.map(|(subscription, plan)| CurrentSubscriptionDto::from_parts(subscription, plan)))
    }
}

/// Expires every `ACTIVE` subscription whose period ended before today.
pub struct SubscriptionExpiryUseCase {
    subscription_repository: Arc<dyn SubscriptionRepository + Send + Sync>,
    offset: FixedOffset,
}

impl SubscriptionExpiryUseCase {
    pub fn new(
        subscription_repository: Arc<dyn SubscriptionRepository + Send + Sync>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            subscription_repository,
            offset,
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = start_of_day(&now.with_timezone(&self.offset))?;
        let expired = self.subscription_repository.expire_lapsed(cutoff).await?;
        info!(%cutoff, expired, "subscription_expiry: sweep finished");
        Ok(expired)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoBillingReport {
    pub due: usize,
    pub renewed: usize,
    pub already_renewed: usize,
    pub skipped_locked: usize,
    pub failed: usize,
}

/// Charges every auto-renewing subscription that expires tomorrow.
pub struct AutoBillingUseCase {
    subscription_repository: Arc<dyn SubscriptionRepository + Send + Sync>,
    pipeline: Arc<PaymentPipeline>,
    lock: DistributedLock,
    lock_ttl: StdDuration,
    offset: FixedOffset,
}

impl AutoBillingUseCase {
    pub fn new(
        subscription_repository: Arc<dyn SubscriptionRepository + Send + Sync>,
        pipeline: Arc<PaymentPipeline>,
        lock: DistributedLock,
        lock_ttl: StdDuration,
        offset: FixedOffset,
    ) -> Self {
        Self {
            subscription_repository,
            pipeline,
            lock,
            lock_ttl,
            offset,
        }
    }

    /// Fails when any charge failed, so the scheduler retries the sweep.
    /// Subscriptions renewed by an earlier attempt are skipped on retry.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<AutoBillingReport> {
        let today = start_of_day(&now.with_timezone(&self.offset))?;
        let from = today + Duration::days(1);
        let until = today + Duration::days(2);

        let due = self
            .subscription_repository
            .find_auto_renew_due(from, until)
            .await?;
        let mut report = AutoBillingReport {
            due: due.len(),
            ..Default::default()
        };

        for subscription in due {
            let lock_key = format!(
                "auto-billing:{}:{}",
                subscription.id,
                subscription.expired_at.timestamp()
            );
            let token = DistributedLock::new_holder_token();
            if !self.lock.try_lock(&lock_key, &token, self.lock_ttl).await {
                warn!(subscription_id = %subscription.id, "auto_billing: renewal in progress elsewhere");
                report.skipped_locked += 1;
                continue;
            }

            let outcome = self.pipeline.charge_renewal(&subscription).await;
            self.lock.unlock(&lock_key, &token).await;

            match outcome {
                Ok(RenewalOutcome::Renewed { order_id, expired_at }) => {
                    info!(
                        subscription_id = %subscription.id,
                        %order_id,
                        expired_at = ?expired_at,
                        "auto_billing: subscription renewed"
                    );
                    report.renewed += 1;
                }
                Ok(RenewalOutcome::AlreadyRenewed) => report.already_renewed += 1,
                Err(err) => {
                    error!(
                        subscription_id = %subscription.id,
                        account_id = %subscription.account_id,
                        error = %err,
                        "auto_billing: renewal charge failed"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(?report, "auto_billing: sweep finished");
        if report.failed > 0 {
            bail!(
                "auto_billing: {} of {} renewals failed",
                report.failed,
                report.due
            );
        }
        Ok(report)
    }
}
