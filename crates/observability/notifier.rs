use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Level;
use tracing::warn;

const QUEUE_CAPACITY: usize = 256;

/// Repeats of one alert inside this window are not forwarded again.
const REPEAT_WINDOW_SECS: i64 = 300;

/// Fields that tie an alert to one payment or job run. Also listed first
/// in forwarded messages.
pub(crate) const CORRELATION_FIELDS: [&str; 4] = ["order_id", "payment_id", "job", "subscription_id"];

#[derive(Clone, Debug)]
pub(crate) struct SpanSummary {
    pub(crate) name: String,
    pub(crate) fields: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub(crate) struct NotificationEvent {
    pub(crate) level: Level,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) service_name: String,
    pub(crate) environment: String,
    pub(crate) component: String,
    pub(crate) target: String,
    pub(crate) file: Option<String>,
    pub(crate) line: Option<u32>,
    pub(crate) message: Option<String>,
    pub(crate) fields: BTreeMap<String, String>,
    pub(crate) spans: Vec<SpanSummary>,
}

impl NotificationEvent {
    /// Identity of the alert: its message plus whichever correlation
    /// fields it carries, on the event or its spans. `None` when the event
    /// names no payment or job, so it is always forwarded.
    fn correlation_key(&self) -> Option<String> {
        let lookup = |field: &str| {
            self.fields
                .get(field)
                .or_else(|| self.spans.iter().rev().find_map(|span| span.fields.get(field)))
        };
        let ids: Vec<String> = CORRELATION_FIELDS
            .iter()
            .filter_map(|field| lookup(*field).map(|value| format!("{field}={value}")))
            .collect();
        if ids.is_empty() {
            return None;
        }
        Some(format!(
            "{}|{}",
            self.message.as_deref().unwrap_or_default(),
            ids.join(",")
        ))
    }
}

#[async_trait]
pub(crate) trait NotificationProvider: Send + Sync {
    async fn send(&self, event: &NotificationEvent) -> Result<()>;
    fn provider_name(&self) -> &'static str;
}

/// Suppresses an alert already sent for the same payment or job within
/// the repeat window. A payment failing on every retry attempt pages once.
struct RepeatFilter {
    window: Duration,
    last_sent: HashMap<String, DateTime<Utc>>,
}

impl RepeatFilter {
    fn new(window: Duration) -> Self {
        Self {
            window,
            last_sent: HashMap::new(),
        }
    }

    fn admit(&mut self, event: &NotificationEvent) -> bool {
        let Some(key) = event.correlation_key() else {
            return true;
        };
        let now = event.timestamp;
        let window = self.window;
        self.last_sent.retain(|_, sent| now - *sent < window);

        if self.last_sent.contains_key(&key) {
            return false;
        }
        self.last_sent.insert(key, now);
        true
    }
}

#[derive(Clone)]
pub(crate) struct Notifier {
    tx: mpsc::Sender<NotificationEvent>,
}

impl Notifier {
    pub(crate) fn new(providers: Vec<Arc<dyn NotificationProvider>>) -> Self {
        let (tx, mut rx) = mpsc::channel::<NotificationEvent>(QUEUE_CAPACITY);
        let mut repeats = RepeatFilter::new(Duration::seconds(REPEAT_WINDOW_SECS));

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !repeats.admit(&event) {
                    continue;
                }
                for provider in &providers {
                    if let Err(error) = provider.send(&event).await {
                        warn!(
                            provider = provider.provider_name(),
                            error = %error,
                            "observability: notification provider failed"
                        );
                    }
                }
            }
        });

        Self { tx }
    }

    pub(crate) fn try_notify(&self, event: NotificationEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(target: "observability", "observability: notification queue full; dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(target: "observability", "observability: notification queue closed; dropping event");
            }
        }
    }
}
