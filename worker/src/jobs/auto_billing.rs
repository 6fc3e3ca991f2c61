use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use crates::application::subscriptions::AutoBillingUseCase;
use tracing::info;

use crate::scheduler::trigger::{JobContext, ScheduledJob};

pub const JOB_KEY: &str = "auto-billing";

/// Fails when any renewal failed, so the scheduler retries the whole sweep.
pub struct AutoBillingJob {
    usecase: Arc<AutoBillingUseCase>,
}

impl AutoBillingJob {
    pub fn new(usecase: Arc<AutoBillingUseCase>) -> Self {
        Self { usecase }
    }
}

#[async_trait]
impl ScheduledJob for AutoBillingJob {
    fn key(&self) -> &'static str {
        JOB_KEY
    }

    async fn execute(&self, ctx: &JobContext) -> Result<()> {
        let report = self.usecase.run(ctx.fired_at).await?;
        info!(
            job = JOB_KEY,
            due = report.due,
            renewed = report.renewed,
            already_renewed = report.already_renewed,
            skipped_locked = report.skipped_locked,
            current_retry = ctx.trigger.retry.current_retry(),
            "auto_billing: job finished"
        );
        Ok(())
    }
}
