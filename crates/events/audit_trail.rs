use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::bus::PaymentEvent;
use crate::domain::{
    entities::payment_histories::InsertPaymentHistoryEntity,
    repositories::{
        app_users::AppUserRepository, mail::MailSender,
        payment_histories::PaymentHistoryRepository, payments::PaymentRepository,
    },
};

/// Records every payment status change and sends receipt mail, off the
/// request path. Failures are logged and never retried.
pub struct AuditTrail {
    payment_history_repository: Arc<dyn PaymentHistoryRepository + Send + Sync>,
    payment_repository: Arc<dyn PaymentRepository + Send + Sync>,
    app_user_repository: Arc<dyn AppUserRepository + Send + Sync>,
    mail_sender: Arc<dyn MailSender + Send + Sync>,
}

impl AuditTrail {
    pub fn new(
        payment_history_repository: Arc<dyn PaymentHistoryRepository + Send + Sync>,
        payment_repository: Arc<dyn PaymentRepository + Send + Sync>,
        app_user_repository: Arc<dyn AppUserRepository + Send + Sync>,
        mail_sender: Arc<dyn MailSender + Send + Sync>,
    ) -> Self {
        Self {
            payment_history_repository,
            payment_repository,
            app_user_repository,
            mail_sender,
        }
    }

    pub async fn handle(&self, event: PaymentEvent) -> Result<()> {
        match event {
            PaymentEvent::StatusChanged {
                payment_id,
                order_id,
                status,
                reason,
                occurred_at,
            } => {
                self.payment_history_repository
                    .append(InsertPaymentHistoryEntity {
                        payment_id,
                        status: status.to_string(),
                        reason,
                        recorded_at: occurred_at,
                    })
                    .await
                    .with_context(|| format!("audit_trail: history append for {order_id}"))?;
                debug!(%order_id, %status, "audit_trail: history recorded");
                Ok(())
            }
            PaymentEvent::MailRequested {
                account_id,
                order_id,
                ..
            } => {
                let Some(address) = self.app_user_repository.find_email(account_id).await? else {
                    warn!(%order_id, %account_id, "audit_trail: no email on account; receipt skipped");
                    return Ok(());
                };
                let receipt_url = self
                    .payment_repository
                    .find_by_order_id(&order_id)
                    .await?
                    .and_then(|payment| payment.receipt_url);
                let Some(receipt_url) = receipt_url else {
                    warn!(%order_id, "audit_trail: no receipt url; receipt skipped");
                    return Ok(());
                };

                self.mail_sender
                    .send_receipt(&address, &receipt_url)
                    .await
                    .with_context(|| format!("audit_trail: receipt mail for {order_id}"))?;
                info!(%order_id, "audit_trail: receipt mail sent");
                Ok(())
            }
        }
    }

    /// Starts the dispatcher. At most `workers` events are handled at once;
    /// the task ends once every sender is dropped and in-flight work drains.
    pub fn spawn(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<PaymentEvent>,
        workers: usize,
    ) -> JoinHandle<()> {
        let workers = workers.max(1);
        let permits = Arc::new(Semaphore::new(workers));

        tokio::spawn(async move {
            info!(workers, "audit_trail: consumer pool started");
            while let Some(event) = rx.recv().await {
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    break;
                };
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    let order_id = event.order_id().to_string();
                    if let Err(err) = this.handle(event).await {
                        warn!(%order_id, error = ?err, "audit_trail: event handling failed");
                    }
                    drop(permit);
                });
            }

            let _drained = permits.acquire_many(workers as u32).await;
            info!("audit_trail: consumer pool stopped");
        })
    }
}
