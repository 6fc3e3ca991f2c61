use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{
    entities::payments::PaymentEntity, value_objects::enums::payment_statuses::PaymentStatus,
};

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvent {
    StatusChanged {
        payment_id: Uuid,
        order_id: String,
        status: PaymentStatus,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    MailRequested {
        payment_id: Uuid,
        account_id: Uuid,
        order_id: String,
        occurred_at: DateTime<Utc>,
    },
}

impl PaymentEvent {
    pub fn status_changed(payment: &PaymentEntity, reason: Option<String>) -> Self {
        PaymentEvent::StatusChanged {
            payment_id: payment.id,
            order_id: payment.order_id.clone(),
            status: payment.status(),
            reason,
            occurred_at: Utc::now(),
        }
    }

    pub fn mail_requested(payment: &PaymentEntity) -> Self {
        PaymentEvent::MailRequested {
            payment_id: payment.id,
            account_id: payment.account_id,
            order_id: payment.order_id.clone(),
            occurred_at: Utc::now(),
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            PaymentEvent::StatusChanged { order_id, .. } => order_id,
            PaymentEvent::MailRequested { order_id, .. } => order_id,
        }
    }
}

/// Producer side of the payment event queue.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<PaymentEvent>,
}

impl EventBus {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PaymentEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Never blocks the caller. When the queue is full the event is handed
    /// to a detached task that waits for capacity.
    pub fn publish(&self, event: PaymentEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(order_id = %event.order_id(), "event_bus: queue full; deferring publish");
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = tx.send(event).await {
                        warn!(order_id = %err.0.order_id(), "event_bus: queue closed; dropping event");
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(order_id = %event.order_id(), "event_bus: queue closed; dropping event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_event(order_id: &str) -> PaymentEvent {
        PaymentEvent::StatusChanged {
            payment_id: Uuid::new_v4(),
            order_id: order_id.to_string(),
            status: PaymentStatus::Ready,
            reason: None,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn full_queue_defers_instead_of_dropping() {
        let (bus, mut rx) = EventBus::channel(1);

        bus.publish(status_event("ORD-1"));
        bus.publish(status_event("ORD-2"));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.order_id(), "ORD-1");
        assert_eq!(second.order_id(), "ORD-2");
    }
}
