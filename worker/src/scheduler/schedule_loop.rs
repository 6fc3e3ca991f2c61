use std::{
    cmp::{Ordering, Reverse},
    collections::{BinaryHeap, HashMap},
    future::Future,
    sync::Arc,
    time::Duration as StdDuration,
};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use super::{
    retry_runner::RetryingJobRunner,
    trigger::{JobTrigger, ScheduledJob, TriggerKind, TriggerSink},
};

#[derive(Debug, Clone)]
pub struct DailySchedule {
    pub job_key: String,
    pub at: NaiveTime,
}

/// First occurrence of wall-clock `at` in `offset` strictly after `after`.
pub fn next_daily_fire(
    at: NaiveTime,
    offset: FixedOffset,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let local_day = after.with_timezone(&offset).date_naive();
    let candidate = offset
        .from_local_datetime(&local_day.and_time(at))
        .single()
        .context("scheduler: ambiguous local fire time")?
        .with_timezone(&Utc);

    if candidate > after {
        Ok(candidate)
    } else {
        Ok(candidate + Duration::days(1))
    }
}

/// Hands one-shot triggers to the running scheduler.
#[derive(Clone)]
pub struct ChannelTriggerSink {
    tx: UnboundedSender<JobTrigger>,
}

pub fn trigger_channel() -> (ChannelTriggerSink, UnboundedReceiver<JobTrigger>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelTriggerSink { tx }, rx)
}

#[async_trait]
impl TriggerSink for ChannelTriggerSink {
    async fn schedule_once(&self, trigger: JobTrigger) -> Result<()> {
        self.tx
            .send(trigger)
            .map_err(|_| anyhow!("scheduler: trigger channel closed"))
    }
}

struct Pending {
    seq: u64,
    trigger: JobTrigger,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.trigger.fire_at, self.seq).cmp(&(other.trigger.fire_at, other.seq))
    }
}

/// Min-heap of triggers waiting to fire. Ties fire in arrival order.
struct TriggerQueue {
    pending: BinaryHeap<Reverse<Pending>>,
    next_seq: u64,
    daily: HashMap<String, NaiveTime>,
    offset: FixedOffset,
}

impl TriggerQueue {
    fn push(&mut self, trigger: JobTrigger) {
        self.pending.push(Reverse(Pending {
            seq: self.next_seq,
            trigger,
        }));
        self.next_seq += 1;
    }

    fn arm_daily(&mut self, job_key: &str, after: DateTime<Utc>) -> Result<()> {
        let Some(at) = self.daily.get(job_key).copied() else {
            return Ok(());
        };
        let fire_at = next_daily_fire(at, self.offset, after)?;
        debug!(job = job_key, %fire_at, "scheduler: regular trigger armed");
        self.push(JobTrigger::regular(job_key, fire_at));
        Ok(())
    }

    fn time_until_next(&self, now: DateTime<Utc>) -> Option<StdDuration> {
        self.pending.peek().map(|Reverse(next)| {
            (next.trigger.fire_at - now)
                .to_std()
                .unwrap_or(StdDuration::ZERO)
        })
    }

    fn pop_due(&mut self, now: DateTime<Utc>) -> Option<JobTrigger> {
        match self.pending.peek() {
            Some(Reverse(next)) if next.trigger.fire_at <= now => {
                self.pending.pop().map(|Reverse(due)| due.trigger)
            }
            _ => None,
        }
    }
}

/// Fires daily jobs and their retries from a single task. A job runs to
/// completion before the next trigger is taken.
pub struct Scheduler {
    jobs: HashMap<String, Arc<dyn ScheduledJob>>,
    queue: TriggerQueue,
    runner: RetryingJobRunner,
    retries: UnboundedReceiver<JobTrigger>,
}

impl Scheduler {
    pub fn new(
        jobs: Vec<Arc<dyn ScheduledJob>>,
        schedules: Vec<DailySchedule>,
        offset: FixedOffset,
        runner: RetryingJobRunner,
        retries: UnboundedReceiver<JobTrigger>,
    ) -> Self {
        Self {
            jobs: jobs
                .into_iter()
                .map(|job| (job.key().to_string(), job))
                .collect(),
            queue: TriggerQueue {
                pending: BinaryHeap::new(),
                next_seq: 0,
                daily: schedules
                    .into_iter()
                    .map(|schedule| (schedule.job_key, schedule.at))
                    .collect(),
                offset,
            },
            runner,
            retries,
        }
    }

    pub async fn run<S>(self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let Scheduler {
            jobs,
            mut queue,
            runner,
            mut retries,
        } = self;

        let now = Utc::now();
        let daily_keys: Vec<String> = queue.daily.keys().cloned().collect();
        for job_key in &daily_keys {
            queue.arm_daily(job_key, now)?;
        }
        info!(jobs = jobs.len(), daily = daily_keys.len(), "scheduler: started");

        tokio::pin!(shutdown);
        loop {
            let wait = queue.time_until_next(Utc::now());

            tokio::select! {
                _ = &mut shutdown => {
                    info!(pending = queue.pending.len(), "scheduler: shutting down");
                    return Ok(());
                }
                Some(trigger) = retries.recv() => {
                    debug!(
                        job = %trigger.job_key,
                        fire_at = %trigger.fire_at,
                        current_retry = trigger.retry.current_retry(),
                        "scheduler: one-shot trigger queued"
                    );
                    queue.push(trigger);
                }
                _ = tokio::time::sleep(wait.unwrap_or(StdDuration::ZERO)), if wait.is_some() => {
                    while let Some(trigger) = queue.pop_due(Utc::now()) {
                        if trigger.kind == TriggerKind::Regular {
                            queue.arm_daily(&trigger.job_key, trigger.fire_at)?;
                        }

                        let Some(job) = jobs.get(&trigger.job_key) else {
                            warn!(job = %trigger.job_key, "scheduler: no job registered for trigger");
                            continue;
                        };
                        let outcome = runner.run(job.as_ref(), &trigger, Utc::now()).await;
                        debug!(job = %trigger.job_key, ?outcome, "scheduler: trigger fired");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use super::*;
    use crate::scheduler::{
        retry_runner::JobRetrySettings,
        trigger::{JobContext, RetryState},
    };
    use crates::observability::MockNotificationChannel;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn next_fire_is_later_today_or_tomorrow() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();

        assert_eq!(
            next_daily_fire(nine, utc, at("2026-03-10T08:00:00Z")).unwrap(),
            at("2026-03-10T09:00:00Z")
        );
        assert_eq!(
            next_daily_fire(nine, utc, at("2026-03-10T09:00:00Z")).unwrap(),
            at("2026-03-11T09:00:00Z")
        );
    }

    #[test]
    fn next_fire_uses_configured_offset() {
        let kst = FixedOffset::east_opt(9 * 3600).unwrap();
        let five_past_midnight = NaiveTime::from_hms_opt(0, 5, 0).unwrap();

        assert_eq!(
            next_daily_fire(five_past_midnight, kst, at("2026-03-10T12:00:00Z")).unwrap(),
            at("2026-03-10T15:05:00Z")
        );
    }

    #[test]
    fn queue_pops_earliest_first() {
        let mut queue = TriggerQueue {
            pending: BinaryHeap::new(),
            next_seq: 0,
            daily: HashMap::new(),
            offset: FixedOffset::east_opt(0).unwrap(),
        };
        queue.push(JobTrigger::regular("late", at("2026-03-10T10:00:00Z")));
        queue.push(JobTrigger::regular("early", at("2026-03-10T09:00:00Z")));

        let now = at("2026-03-10T11:00:00Z");
        assert_eq!(queue.pop_due(now).unwrap().job_key, "early");
        assert_eq!(queue.pop_due(now).unwrap().job_key, "late");
        assert!(queue.pop_due(now).is_none());
    }

    struct FlakyJob {
        calls: AtomicUsize,
        seen: mpsc::UnboundedSender<(u32, DateTime<Utc>)>,
    }

    #[async_trait]
    impl ScheduledJob for FlakyJob {
        fn key(&self) -> &'static str {
            "auto-billing"
        }

        async fn execute(&self, ctx: &JobContext) -> Result<()> {
            let _ = self
                .seen
                .send((ctx.trigger.retry.current_retry(), ctx.fired_at));
            if self.calls.fetch_add(1, AtomicOrdering::SeqCst) == 0 {
                return Err(anyhow!("gateway unavailable"));
            }
            Ok(())
        }
    }

    fn flaky_scheduler() -> (
        Scheduler,
        ChannelTriggerSink,
        mpsc::UnboundedReceiver<(u32, DateTime<Utc>)>,
    ) {
        let (sink, retries) = trigger_channel();
        let mut notifier = MockNotificationChannel::new();
        notifier.expect_notify().never();
        let runner = RetryingJobRunner::new(
            Arc::new(sink.clone()),
            Arc::new(notifier),
            JobRetrySettings {
                max_retry: 3,
                retry_interval: Duration::zero(),
            },
        );

        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        let job = Arc::new(FlakyJob {
            calls: AtomicUsize::new(0),
            seen: seen_tx,
        });
        let scheduler = Scheduler::new(
            vec![job as Arc<dyn ScheduledJob>],
            Vec::new(),
            FixedOffset::east_opt(0).unwrap(),
            runner,
            retries,
        );
        (scheduler, sink, seen_rx)
    }

    #[tokio::test]
    async fn failed_job_is_retried_through_a_new_trigger() {
        let (scheduler, sink, mut seen_rx) = flaky_scheduler();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(scheduler.run(async {
            let _ = stop_rx.await;
        }));

        let fire_at = Utc::now();
        sink.schedule_once(JobTrigger {
            job_key: "auto-billing".to_string(),
            fire_at,
            scheduled_for: fire_at,
            kind: TriggerKind::Retry,
            retry: RetryState::initial(),
        })
        .await
        .unwrap();

        assert_eq!(seen_rx.recv().await.map(|(retry, _)| retry), Some(0));
        assert_eq!(seen_rx.recv().await.map(|(retry, _)| retry), Some(1));

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn retry_crossing_midnight_keeps_the_original_fire_time() {
        let (scheduler, sink, mut seen_rx) = flaky_scheduler();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(scheduler.run(async {
            let _ = stop_rx.await;
        }));

        let late_evening = at("2026-03-10T23:55:00Z");
        sink.schedule_once(JobTrigger::regular("auto-billing", late_evening))
            .await
            .unwrap();

        let (first_retry, first_fired_at) = seen_rx.recv().await.unwrap();
        let (second_retry, second_fired_at) = seen_rx.recv().await.unwrap();
        assert_eq!((first_retry, first_fired_at), (0, late_evening));
        assert_eq!(second_retry, 1);
        assert_eq!(second_fired_at, late_evening);

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
