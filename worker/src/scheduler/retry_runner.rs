use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use crates::observability::NotificationChannel;
use tracing::{error, info, warn};

use super::trigger::{JobContext, JobTrigger, ScheduledJob, TriggerSink};

#[derive(Debug, Clone, Copy)]
pub struct JobRetrySettings {
    pub max_retry: u32,
    pub retry_interval: Duration,
}

impl Default for JobRetrySettings {
    fn default() -> Self {
        Self {
            max_retry: 3,
            retry_interval: Duration::minutes(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRunOutcome {
    Succeeded,
    RetryScheduled(JobTrigger),
    Escalated,
}

/// Runs a job and turns a failure into either one new delayed trigger or,
/// once the retry budget is spent, an operator notification.
pub struct RetryingJobRunner {
    sink: Arc<dyn TriggerSink + Send + Sync>,
    notifier: Arc<dyn NotificationChannel + Send + Sync>,
    settings: JobRetrySettings,
}

impl RetryingJobRunner {
    pub fn new(
        sink: Arc<dyn TriggerSink + Send + Sync>,
        notifier: Arc<dyn NotificationChannel + Send + Sync>,
        settings: JobRetrySettings,
    ) -> Self {
        Self {
            sink,
            notifier,
            settings,
        }
    }

    pub async fn run(
        &self,
        job: &dyn ScheduledJob,
        trigger: &JobTrigger,
        now: DateTime<Utc>,
    ) -> JobRunOutcome {
        let ctx = JobContext {
            fired_at: trigger.scheduled_for,
            trigger: trigger.clone(),
        };
        let current_retry = trigger.retry.current_retry();

        let err = match job.execute(&ctx).await {
            Ok(()) => {
                info!(job = job.key(), current_retry, "scheduler: job succeeded");
                return JobRunOutcome::Succeeded;
            }
            Err(err) => err,
        };

        if current_retry < self.settings.max_retry {
            let retry = trigger.retry_of(now + self.settings.retry_interval);
            match self.sink.schedule_once(retry.clone()).await {
                Ok(()) => {
                    warn!(
                        job = job.key(),
                        current_retry,
                        next_retry = retry.retry.current_retry(),
                        fire_at = %retry.fire_at,
                        error = %err,
                        "scheduler: job failed, retry scheduled"
                    );
                    return JobRunOutcome::RetryScheduled(retry);
                }
                Err(sink_err) => {
                    error!(
                        job = job.key(),
                        error = %sink_err,
                        "scheduler: could not schedule retry"
                    );
                    return self
                        .escalate(
                            job.key(),
                            current_retry,
                            &format!("{err:#}\nretry could not be scheduled: {sink_err:#}"),
                        )
                        .await;
                }
            }
        }

        self.escalate(job.key(), current_retry, &format!("{err:#}"))
            .await
    }

    async fn escalate(&self, job_key: &str, current_retry: u32, detail: &str) -> JobRunOutcome {
        error!(
            job = job_key,
            current_retry,
            max_retry = self.settings.max_retry,
            error = %detail,
            "scheduler: job failed, retries exhausted"
        );

        let title = format!("Scheduled job {job_key} failed after {current_retry} retries");
        if let Err(err) = self.notifier.notify(&title, detail).await {
            warn!(job = job_key, error = %err, "scheduler: failure notification not delivered");
        }
        JobRunOutcome::Escalated
    }
}
