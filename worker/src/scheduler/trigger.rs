use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;

/// Retry counter carried by a trigger. Never mutated: each retry gets a new
/// trigger holding [`RetryState::next`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    current_retry: u32,
}

impl RetryState {
    pub fn initial() -> Self {
        Self::default()
    }

    pub fn with_retry(current_retry: u32) -> Self {
        Self { current_retry }
    }

    pub fn current_retry(&self) -> u32 {
        self.current_retry
    }

    pub fn next(&self) -> Self {
        Self {
            current_retry: self.current_retry.saturating_add(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Fired by the daily schedule and re-armed afterwards.
    Regular,
    /// One-shot, discarded after firing.
    Retry,
}
/// `scheduled_for` is the fire time of the regular run a retry descends
/// from. Jobs measure their day from it, so a retry that fires after
/// midnight still covers the original day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTrigger {
    pub job_key: String,
    pub fire_at: DateTime<Utc>,
    pub scheduled_for: DateTime<Utc>,
    pub kind: TriggerKind,
    pub retry: RetryState,
}

impl JobTrigger {
    pub fn regular(job_key: &str, fire_at: DateTime<Utc>) -> Self {
        Self {
            job_key: job_key.to_string(),
            fire_at,
            scheduled_for: fire_at,
            kind: TriggerKind::Regular,
            retry: RetryState::initial(),
        }
    }

    pub fn retry_of(&self, fire_at: DateTime<Utc>) -> Self {
        Self {
            job_key: self.job_key.clone(),
            fire_at,
            scheduled_for: self.scheduled_for,
            kind: TriggerKind::Retry,
            retry: self.retry.next(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobContext {
    /// The originating run's scheduled time, not the wall clock.
    pub fired_at: DateTime<Utc>,
    pub trigger: JobTrigger,
}

#[automock]
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn key(&self) -> &'static str;

    async fn execute(&self, ctx: &JobContext) -> Result<()>;
}

#[automock]
#[async_trait]
pub trait TriggerSink {
    async fn schedule_once(&self, trigger: JobTrigger) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_trigger_is_a_new_one_shot_with_next_counter() {
        let fired = Utc::now();
        let regular = JobTrigger::regular("auto-billing", fired);
        let retry = regular.retry_of(fired + chrono::Duration::minutes(10));

        assert_eq!(regular.retry.current_retry(), 0);
        assert_eq!(retry.retry.current_retry(), 1);
        assert_eq!(retry.kind, TriggerKind::Retry);
        assert_eq!(retry.job_key, "auto-billing");
        assert_eq!(retry.scheduled_for, fired);
        let second = retry.retry_of(fired + chrono::Duration::minutes(20));
        assert_eq!(second.retry.current_retry(), 2);
        assert_eq!(second.scheduled_for, fired);
    }
}
