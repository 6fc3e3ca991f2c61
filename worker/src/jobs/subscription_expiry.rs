use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use crates::application::subscriptions::SubscriptionExpiryUseCase;
use tracing::info;

use crate::scheduler::trigger::{JobContext, ScheduledJob};

pub const JOB_KEY: &str = "subscription-expiry";

pub struct SubscriptionExpiryJob {
    usecase: Arc<SubscriptionExpiryUseCase>,
}

impl SubscriptionExpiryJob {
    pub fn new(usecase: Arc<SubscriptionExpiryUseCase>) -> Self {
        Self { usecase }
    }
}

#[async_trait]
impl ScheduledJob for SubscriptionExpiryJob {
    fn key(&self) -> &'static str {
        JOB_KEY
    }

    async fn execute(&self, ctx: &JobContext) -> Result<()> {
        let expired = self.usecase.run(ctx.fired_at).await?;
        info!(
            job = JOB_KEY,
            expired,
            current_retry = ctx.trigger.retry.current_retry(),
            "subscription_expiry: job finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, FixedOffset, Utc};
    use crates::domain::repositories::subscriptions::MockSubscriptionRepository;
    use mockall::predicate::eq;

    use super::*;
    use crate::scheduler::trigger::JobTrigger;

    #[tokio::test]
    async fn expires_lapsed_subscriptions_as_of_fire_time() {
        let fired_at = DateTime::parse_from_rfc3339("2026-03-10T00:05:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let midnight = DateTime::parse_from_rfc3339("2026-03-10T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let mut repo = MockSubscriptionRepository::new();
        repo.expect_expire_lapsed()
            .with(eq(midnight))
            .times(1)
            .returning(|_| Ok(2));
        let job = SubscriptionExpiryJob::new(Arc::new(SubscriptionExpiryUseCase::new(
            Arc::new(repo),
            FixedOffset::east_opt(0).unwrap(),
        )));

        let ctx = JobContext {
            fired_at,
            trigger: JobTrigger::regular(JOB_KEY, fired_at),
        };
        job.execute(&ctx).await.unwrap();
    }
}
