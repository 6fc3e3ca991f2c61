use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use http::StatusCode;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    concurrency::idempotency::{IdempotencyGuard, Reservation, ReservationHandle},
    domain::{
        entities::{
            payments::{InsertPaymentEntity, PaymentEntity},
            plans::PlanEntity,
            subscriptions::SubscriptionEntity,
        },
        repositories::{
            payment_gateway::{GatewayError, PaymentGateway},
            payments::PaymentRepository,
            plans::PlanRepository,
            subscriptions::SubscriptionRepository,
        },
        value_objects::{
            enums::payment_statuses::PaymentStatus,
            payments::{
                CompletionOutcome, ConfirmPaymentCommand, Entitlement, FailureStage,
                IssueBillingKeyModel, PaymentApproval, PaymentRequestDto, PaymentResultDto,
                TransitionOutcome, new_order_id,
            },
        },
    },
    events::bus::{EventBus, PaymentEvent},
    resilience::retry::{RetryError, RetryPolicy, any_error, with_retry},
};

const CONFIRM_SCOPE: &str = "payment-confirm";

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("plan not found")]
    PlanNotFound,
    #[error("payment not found")]
    PaymentNotFound,
    #[error("duplicate payment request")]
    DuplicateRequest,
    #[error("amount mismatch: expected {expected}, claimed {claimed}")]
    StaleOrMismatchedAmount { expected: i64, claimed: i64 },
    #[error("payment could not be prepared, please retry")]
    PreparationFailed,
    #[error("payment rejected by gateway ({code}): {message}")]
    GatewayRejected { code: String, message: String },
    #[error("payment gateway unavailable")]
    GatewayUnavailable,
    #[error("granted subscription could not be resolved")]
    GrantedInfoMissing,
    #[error("payment could not be completed")]
    CompletionFailed,
    #[error("payment is still processing")]
    StillProcessing,
    #[error("billing key issuance failed")]
    BillingKeyIssueFailed,
    #[error("no billing key registered for account")]
    BillingKeyMissing,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PaymentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::PlanNotFound | PaymentError::PaymentNotFound => StatusCode::NOT_FOUND,
            PaymentError::DuplicateRequest => StatusCode::CONFLICT,
            PaymentError::StaleOrMismatchedAmount { .. } => StatusCode::BAD_REQUEST,
            PaymentError::GatewayRejected { .. } => StatusCode::PAYMENT_REQUIRED,
            PaymentError::BillingKeyMissing => StatusCode::UNPROCESSABLE_ENTITY,
            PaymentError::StillProcessing => StatusCode::ACCEPTED,
            PaymentError::PreparationFailed
            | PaymentError::GatewayUnavailable
            | PaymentError::BillingKeyIssueFailed => StatusCode::SERVICE_UNAVAILABLE,
            PaymentError::GrantedInfoMissing
            | PaymentError::CompletionFailed
            | PaymentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type PaymentResult<T> = std::result::Result<T, PaymentError>;

#[derive(Debug, Clone, Copy)]
pub struct PaymentPipelineSettings {
    pub gateway_timeout: Duration,
    pub idempotency_ttl: Duration,
    pub storage_retry: RetryPolicy,
}

impl Default for PaymentPipelineSettings {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(10),
            idempotency_ttl: Duration::from_secs(60),
            storage_retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of one auto-billing attempt for a due subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RenewalOutcome {
    Renewed {
        order_id: String,
        expired_at: Option<DateTime<Utc>>,
    },
    AlreadyRenewed,
}

/// Drives a payment through request, prepare, confirm, complete and the
/// error phase. Gateway calls never run inside a database transaction.
pub struct PaymentPipeline {
    payment_repository: Arc<dyn PaymentRepository + Send + Sync>,
    plan_repository: Arc<dyn PlanRepository + Send + Sync>,
    subscription_repository: Arc<dyn SubscriptionRepository + Send + Sync>,
    gateway: Arc<dyn PaymentGateway + Send + Sync>,
    idempotency: IdempotencyGuard,
    events: EventBus,
    settings: PaymentPipelineSettings,
}

impl PaymentPipeline {
    pub fn new(
        payment_repository: Arc<dyn PaymentRepository + Send + Sync>,
        plan_repository: Arc<dyn PlanRepository + Send + Sync>,
        subscription_repository: Arc<dyn SubscriptionRepository + Send + Sync>,
        gateway: Arc<dyn PaymentGateway + Send + Sync>,
        idempotency: IdempotencyGuard,
        events: EventBus,
        settings: PaymentPipelineSettings,
    ) -> Self {
        Self {
            payment_repository,
            plan_repository,
            subscription_repository,
            gateway,
            idempotency,
            events,
            settings,
        }
    }

    async fn storage<T, F, Fut>(
        &self,
        operation: &str,
        op: F,
    ) -> Result<T, RetryError<anyhow::Error>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        with_retry(operation, &self.settings.storage_retry, any_error, op).await
    }

    async fn find_plan(&self, plan_id: Uuid) -> PaymentResult<PlanEntity> {
        self.plan_repository
            .find_active_plan_by_id(plan_id)
            .await?
            .ok_or(PaymentError::PlanNotFound)
    }

    async fn create_ready_row(
        &self,
        account_id: Uuid,
        plan: &PlanEntity,
        customer_key: Option<String>,
    ) -> PaymentResult<PaymentEntity> {
        let payment = self
            .payment_repository
            .insert(InsertPaymentEntity {
                account_id,
                plan_id: plan.id,
                order_id: new_order_id(Utc::now()),
                billing_key: None,
                customer_key,
                total_amount: plan.price,
                status: PaymentStatus::Ready.to_string(),
            })
            .await?;

        info!(
            order_id = %payment.order_id,
            %account_id,
            plan_id = %plan.id,
            amount = payment.total_amount,
            "payments: payment requested"
        );
        self.events.publish(PaymentEvent::status_changed(&payment, None));
        Ok(payment)
    }

    /// Creates a `READY` payment for the plan with the plan price as the
    /// amount the client must later confirm.
    pub async fn request_payment(
        &self,
        account_id: Uuid,
        plan_id: Uuid,
    ) -> PaymentResult<PaymentRequestDto> {
        let plan = self.find_plan(plan_id).await?;
        let payment = self.create_ready_row(account_id, &plan, None).await?;
        Ok(PaymentRequestDto::from(&payment))
    }

    /// [`confirm`](Self::confirm) on its own task. Dropping the caller's
    /// future (client gone, request timeout) no longer stops the pipeline
    /// between the gateway call and the complete or error phase.
    pub async fn confirm_detached(
        self: &Arc<Self>,
        command: ConfirmPaymentCommand,
    ) -> PaymentResult<PaymentResultDto> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.confirm(command).await })
            .await
            .map_err(|err| {
                PaymentError::Internal(
                    anyhow::Error::new(err).context("payments: confirm task failed"),
                )
            })?
    }

    /// [`issue_billing_key`](Self::issue_billing_key) on its own task, for
    /// the same reason as [`confirm_detached`](Self::confirm_detached).
    pub async fn issue_billing_key_detached(
        self: &Arc<Self>,
        account_id: Uuid,
        model: IssueBillingKeyModel,
    ) -> PaymentResult<PaymentRequestDto> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.issue_billing_key(account_id, model).await })
            .await
            .map_err(|err| {
                PaymentError::Internal(
                    anyhow::Error::new(err).context("payments: billing key task failed"),
                )
            })?
    }

    /// Runs prepare, confirm and complete for a client-approved payment.
    pub async fn confirm(
        &self,
        command: ConfirmPaymentCommand,
    ) -> PaymentResult<PaymentResultDto> {
        let (payment, _reservation) = self.prepare(&command).await?;
        let approval = self.confirm_with_gateway(&payment, &command).await?;
        self.complete(&payment.order_id, approval).await
    }

    async fn prepare(
        &self,
        command: &ConfirmPaymentCommand,
    ) -> PaymentResult<(PaymentEntity, ReservationHandle)> {
        let payment = self
            .storage("payments: load order", || {
                self.payment_repository.find_by_order_id(&command.order_id)
            })
            .await
            .map_err(|err| {
                error!(
                    order_id = %command.order_id,
                    error = ?err,
                    "payments: order could not be loaded after retries"
                );
                PaymentError::PreparationFailed
            })?
            .filter(|payment| payment.account_id == command.account_id)
            .ok_or(PaymentError::PaymentNotFound)?;

        if payment.total_amount != command.amount {
            warn!(
                order_id = %command.order_id,
                expected = payment.total_amount,
                claimed = command.amount,
                "payments: claimed amount does not match stored amount"
            );
            return Err(PaymentError::StaleOrMismatchedAmount {
                expected: payment.total_amount,
                claimed: command.amount,
            });
        }

        let handle = match self
            .idempotency
            .check_and_reserve(
                CONFIRM_SCOPE,
                &command.idempotency_key,
                self.settings.idempotency_ttl,
            )
            .await
        {
            Reservation::Fresh(handle) => {
                debug!(order_id = %command.order_id, key = handle.key(), "payments: key reserved");
                handle
            }
            Reservation::Duplicate => {
                info!(
                    order_id = %command.order_id,
                    idempotency_key = %command.idempotency_key,
                    "payments: duplicate confirm request"
                );
                return Err(PaymentError::DuplicateRequest);
            }
        };

        let transition = self
            .storage("payments: prepare", || {
                self.payment_repository
                    .mark_in_progress(&command.order_id, &command.payment_key)
            })
            .await;

        match transition {
            Ok(TransitionOutcome::Applied(payment)) => {
                debug!(order_id = %payment.order_id, "payments: prepared");
                self.events.publish(PaymentEvent::status_changed(&payment, None));
                Ok((payment, handle))
            }
            Ok(TransitionOutcome::Rejected { current }) => {
                info!(
                    order_id = %command.order_id,
                    status = %current,
                    "payments: order already past READY"
                );
                Err(PaymentError::DuplicateRequest)
            }
            Err(err) => {
                error!(
                    order_id = %command.order_id,
                    key = handle.key(),
                    error = ?err,
                    "payments: prepare failed after retries; releasing reservation"
                );
                self.idempotency.release(&handle).await;
                Err(PaymentError::PreparationFailed)
            }
        }
    }

    async fn confirm_with_gateway(
        &self,
        payment: &PaymentEntity,
        command: &ConfirmPaymentCommand,
    ) -> PaymentResult<PaymentApproval> {
        let response = timeout(
            self.settings.gateway_timeout,
            self.gateway.confirm_payment(
                &command.payment_key,
                &payment.order_id,
                payment.total_amount,
            ),
        )
        .await
        .unwrap_or(Err(GatewayError::Timeout));

        let err = match response {
            Ok(approval) => return Ok(approval),
            Err(err) => err,
        };

        let stage = gateway_failure_stage(&err);
        if err.outcome_unknown() {
            error!(
                order_id = %payment.order_id,
                error = %err,
                "payments: gateway confirm outcome unknown"
            );
        } else {
            warn!(order_id = %payment.order_id, error = %err, "payments: gateway rejected confirm");
        }
        self.fail(
            &payment.order_id,
            Some(&command.payment_key),
            stage,
            &gateway_failure_detail(&err),
        )
        .await?;
        Err(gateway_payment_error(err))
    }

    async fn complete(
        &self,
        order_id: &str,
        approval: PaymentApproval,
    ) -> PaymentResult<PaymentResultDto> {
        let outcome = self
            .storage("payments: complete", || {
                self.payment_repository.complete(order_id, approval.clone())
            })
            .await;

        self.settle(order_id, &approval, outcome).await
    }

    /// Maps a completion outcome to the caller's result, routing every
    /// failure through the error phase with compensation.
    async fn settle(
        &self,
        order_id: &str,
        approval: &PaymentApproval,
        outcome: Result<CompletionOutcome, RetryError<anyhow::Error>>,
    ) -> PaymentResult<PaymentResultDto> {
        match outcome {
            Ok(CompletionOutcome::Granted {
                payment,
                entitlement,
            }) => {
                info!(
                    order_id = %payment.order_id,
                    status = %payment.status(),
                    expired_at = %entitlement.expired_at,
                    "payments: completed"
                );
                self.events.publish(PaymentEvent::status_changed(&payment, None));
                self.events.publish(PaymentEvent::mail_requested(&payment));
                Ok(result_dto(&payment, Some(entitlement)))
            }
            Ok(CompletionOutcome::AlreadyCompleted {
                payment,
                entitlement,
            }) => {
                info!(order_id = %payment.order_id, "payments: completion already recorded");
                Ok(result_dto(&payment, entitlement))
            }
            Ok(CompletionOutcome::GrantMissing) => {
                error!(%order_id, "payments: granted subscription missing; rolled back");
                self.fail(
                    order_id,
                    Some(&approval.payment_key),
                    FailureStage::Completion,
                    "granted subscription could not be resolved",
                )
                .await?;
                Err(PaymentError::GrantedInfoMissing)
            }
            Ok(CompletionOutcome::Rejected { current }) => {
                error!(
                    %order_id,
                    status = %current,
                    "payments: row not completable after approval"
                );
                self.fail(
                    order_id,
                    Some(&approval.payment_key),
                    FailureStage::Completion,
                    &format!("approved while {current}"),
                )
                .await?;
                Err(PaymentError::CompletionFailed)
            }
            Err(err) => {
                error!(%order_id, error = ?err, "payments: completion failed after retries");
                self.fail(
                    order_id,
                    Some(&approval.payment_key),
                    FailureStage::Completion,
                    &err.to_string(),
                )
                .await?;
                Err(PaymentError::CompletionFailed)
            }
        }
    }

    /// Error phase. Cancels on the gateway when the stage requires it, then
    /// finalizes the row unless it is already terminal. `StillProcessing` is
    /// returned when the failure itself could not be recorded.
    async fn fail(
        &self,
        order_id: &str,
        payment_key: Option<&str>,
        stage: FailureStage,
        detail: &str,
    ) -> PaymentResult<()> {
        let mut reason = format!("{}: {detail}", stage.as_str());

        if stage.requires_compensation() {
            match payment_key {
                Some(payment_key) => {
                    let cancelled = timeout(
                        self.settings.gateway_timeout,
                        self.gateway.cancel_payment(payment_key, &reason),
                    )
                    .await
                    .unwrap_or(Err(GatewayError::Timeout));

                    match cancelled {
                        Ok(()) => info!(%order_id, "payments: gateway payment cancelled"),
                        Err(err) => {
                            error!(%order_id, error = %err, "payments: compensation failed");
                            reason.push_str(&format!("; cancel failed: {err}"));
                        }
                    }
                }
                None => warn!(%order_id, "payments: no payment key to cancel"),
            }
        }

        let finalized = self
            .storage("payments: finalize failure", || {
                self.payment_repository
                    .finalize_failure(order_id, stage, &reason)
            })
            .await;

        match finalized {
            Ok(TransitionOutcome::Applied(payment)) => {
                info!(
                    %order_id,
                    status = %payment.status(),
                    stage = stage.as_str(),
                    "payments: failure recorded"
                );
                self.events
                    .publish(PaymentEvent::status_changed(&payment, Some(reason)));
                Ok(())
            }
            Ok(TransitionOutcome::Rejected { current }) => {
                debug!(%order_id, status = %current, "payments: already terminal; left unchanged");
                Ok(())
            }
            Err(err) => {
                error!(
                    %order_id,
                    stage = stage.as_str(),
                    error = ?err,
                    "payments: failure could not be recorded; payment left processing"
                );
                Err(PaymentError::StillProcessing)
            }
        }
    }

    /// Issues a billing key for recurring charges and turns on auto-renew
    /// for the account's current subscription.
    pub async fn issue_billing_key(
        &self,
        account_id: Uuid,
        model: IssueBillingKeyModel,
    ) -> PaymentResult<PaymentRequestDto> {
        let plan = self.find_plan(model.plan_id).await?;
        let payment = self
            .create_ready_row(account_id, &plan, Some(model.customer_key.clone()))
            .await?;
        let order_id = payment.order_id.clone();

        let issued = timeout(
            self.settings.gateway_timeout,
            self.gateway
                .issue_billing_key(&model.customer_key, &model.auth_key, &order_id),
        )
        .await
        .unwrap_or(Err(GatewayError::Timeout));

        let billing_key = match issued {
            Ok(billing_key) => billing_key,
            Err(err) => {
                warn!(%order_id, error = %err, "payments: billing key issuance failed");
                self.fail(&order_id, None, FailureStage::BillingKeyIssue, &err.to_string())
                    .await?;
                return Err(PaymentError::BillingKeyIssueFailed);
            }
        };

        let ready = match self
            .payment_repository
            .mark_billing_ready(&order_id, &billing_key, &model.customer_key)
            .await
        {
            Ok(TransitionOutcome::Applied(payment)) => payment,
            Ok(TransitionOutcome::Rejected { current }) => {
                return self
                    .abort_billing_key(&order_id, &format!("row was {current}"))
                    .await;
            }
            Err(err) => return self.abort_billing_key(&order_id, &format!("{err:#}")).await,
        };
        self.events.publish(PaymentEvent::status_changed(&ready, None));

        match self.subscription_repository.enable_auto_renew(account_id).await {
            Ok(true) => info!(%order_id, %account_id, "payments: auto-renew enabled"),
            Ok(false) => {
                info!(%order_id, %account_id, "payments: no current subscription to renew")
            }
            Err(err) => return self.abort_billing_key(&order_id, &format!("{err:#}")).await,
        }

        Ok(PaymentRequestDto::from(&ready))
    }

    async fn abort_billing_key(
        &self,
        order_id: &str,
        detail: &str,
    ) -> PaymentResult<PaymentRequestDto> {
        error!(%order_id, detail, "payments: billing key could not be stored");
        self.fail(order_id, None, FailureStage::BillingKeyIssue, detail)
            .await?;
        Err(PaymentError::BillingKeyIssueFailed)
    }

    /// Charges the stored billing key for the period that follows
    /// `subscription`. Callers serialize attempts for one subscription.
    pub async fn charge_renewal(
        &self,
        subscription: &SubscriptionEntity,
    ) -> PaymentResult<RenewalOutcome> {
        if self
            .subscription_repository
            .has_active_after(subscription.account_id, subscription.expired_at)
            .await?
        {
            return Ok(RenewalOutcome::AlreadyRenewed);
        }

        let source = self
            .payment_repository
            .find_latest_billing_key(subscription.account_id)
            .await?
            .ok_or(PaymentError::BillingKeyMissing)?;
        let (Some(billing_key), Some(customer_key)) = (source.billing_key, source.customer_key)
        else {
            return Err(PaymentError::BillingKeyMissing);
        };
        let plan = self.find_plan(subscription.plan_id).await?;

        let payment = self
            .payment_repository
            .insert(InsertPaymentEntity {
                account_id: subscription.account_id,
                plan_id: plan.id,
                order_id: new_order_id(Utc::now()),
                billing_key: Some(billing_key.clone()),
                customer_key: Some(customer_key.clone()),
                total_amount: plan.price,
                status: PaymentStatus::AutoBillingReady.to_string(),
            })
            .await?;
        let order_id = payment.order_id.clone();
        self.events.publish(PaymentEvent::status_changed(&payment, None));

        let charged = timeout(
            self.settings.gateway_timeout,
            self.gateway
                .charge_billing_key(&billing_key, &customer_key, &order_id, plan.price),
        )
        .await
        .unwrap_or(Err(GatewayError::Timeout));

        let approval = match charged {
            Ok(approval) => approval,
            Err(err) => {
                if err.outcome_unknown() {
                    error!(%order_id, error = %err, "payments: renewal charge outcome unknown");
                } else {
                    warn!(%order_id, error = %err, "payments: renewal charge rejected");
                }
                self.fail(
                    &order_id,
                    None,
                    gateway_failure_stage(&err),
                    &gateway_failure_detail(&err),
                )
                .await?;
                return Err(gateway_payment_error(err));
            }
        };

        let outcome = self
            .storage("payments: approve renewal", || {
                self.payment_repository.approve_auto_billing(
                    &order_id,
                    approval.clone(),
                    subscription.expired_at,
                )
            })
            .await;

        let result = self.settle(&order_id, &approval, outcome).await?;
        Ok(RenewalOutcome::Renewed {
            order_id: result.order_id,
            expired_at: result.entitlement.map(|entitlement| entitlement.expired_at),
        })
    }
}

/// A rejection means the gateway did nothing, so only an unknown outcome
/// needs compensation.
fn gateway_failure_stage(err: &GatewayError) -> FailureStage {
    if err.outcome_unknown() {
        FailureStage::GatewayOutcomeUnknown
    } else {
        FailureStage::GatewayRejected
    }
}

fn gateway_failure_detail(err: &GatewayError) -> String {
    match err {
        GatewayError::Rejected { code, message } => format!("{code}: {message}"),
        other => other.to_string(),
    }
}

fn gateway_payment_error(err: GatewayError) -> PaymentError {
    match err {
        GatewayError::Rejected { code, message } => PaymentError::GatewayRejected { code, message },
        GatewayError::Timeout | GatewayError::Unavailable(_) => PaymentError::GatewayUnavailable,
    }
}

fn result_dto(payment: &PaymentEntity, entitlement: Option<Entitlement>) -> PaymentResultDto {
    PaymentResultDto {
        order_id: payment.order_id.clone(),
        status: payment.status(),
        method: payment.method.clone(),
        approved_at: payment.approved_at,
        entitlement,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use mockall::predicate::eq;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        concurrency::distributed_lock::DistributedLock,
        domain::repositories::{
            payment_gateway::MockPaymentGateway, payments::MockPaymentRepository,
            plans::MockPlanRepository, subscriptions::MockSubscriptionRepository,
        },
        infra::kv::memory_store::MemoryStore,
    };

    fn settings() -> PaymentPipelineSettings {
        PaymentPipelineSettings {
            gateway_timeout: Duration::from_millis(200),
            idempotency_ttl: Duration::from_secs(60),
            storage_retry: RetryPolicy::fixed(3, Duration::from_millis(1)),
        }
    }

    fn payment_row(
        account_id: Uuid,
        order_id: &str,
        amount: i64,
        status: PaymentStatus,
    ) -> PaymentEntity {
        let now = Utc::now();
        PaymentEntity {
            id: Uuid::new_v4(),
            account_id,
            plan_id: Uuid::new_v4(),
            order_id: order_id.to_string(),
            payment_key: None,
            billing_key: None,
            customer_key: None,
            total_amount: amount,
            status: status.to_string(),
            method: None,
            approved_at: None,
            failure_reason: None,
            receipt_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn with_status(payment: &PaymentEntity, status: PaymentStatus) -> PaymentEntity {
        PaymentEntity {
            status: status.to_string(),
            ..payment.clone()
        }
    }

    fn plan(price: i64) -> PlanEntity {
        PlanEntity {
            id: Uuid::new_v4(),
            name: "Monthly".to_string(),
            price,
            duration_days: 30,
            is_active: true,
        }
    }

    fn approval() -> PaymentApproval {
        PaymentApproval {
            payment_key: "pk_1".to_string(),
            method: "CARD".to_string(),
            approved_at: Utc::now(),
            receipt_url: Some("https://receipts.example/pk_1".to_string()),
        }
    }

    fn entitlement(plan_id: Uuid) -> Entitlement {
        let now = Utc::now();
        Entitlement {
            subscription_id: Uuid::new_v4(),
            plan_id,
            plan_name: "Monthly".to_string(),
            started_at: now,
            expired_at: now + ChronoDuration::days(30),
        }
    }

    fn command(account_id: Uuid, key: &str, order_id: &str, amount: i64) -> ConfirmPaymentCommand {
        ConfirmPaymentCommand {
            account_id,
            idempotency_key: key.to_string(),
            payment_key: "pk_1".to_string(),
            order_id: order_id.to_string(),
            amount,
        }
    }

    struct Fixture {
        payments: MockPaymentRepository,
        plans: MockPlanRepository,
        subscriptions: MockSubscriptionRepository,
        gateway: MockPaymentGateway,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                payments: MockPaymentRepository::new(),
                plans: MockPlanRepository::new(),
                subscriptions: MockSubscriptionRepository::new(),
                gateway: MockPaymentGateway::new(),
            }
        }

        fn build(mut self) -> (PaymentPipeline, mpsc::Receiver<PaymentEvent>) {
            let gateway = Arc::new(std::mem::replace(&mut self.gateway, MockPaymentGateway::new()));
            self.build_with_gateway(gateway)
        }

        fn build_with_gateway(
            self,
            gateway: Arc<dyn PaymentGateway + Send + Sync>,
        ) -> (PaymentPipeline, mpsc::Receiver<PaymentEvent>) {
            let (events, rx) = EventBus::channel(64);
            let lock = DistributedLock::new(Arc::new(MemoryStore::new()));
            let guard = IdempotencyGuard::new(lock);
            let pipeline = PaymentPipeline::new(
                Arc::new(self.payments),
                Arc::new(self.plans),
                Arc::new(self.subscriptions),
                gateway,
                guard,
                events,
                settings(),
            );
            (pipeline, rx)
        }
    }

    fn drain(rx: &mut mpsc::Receiver<PaymentEvent>) -> Vec<PaymentEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn statuses(events: &[PaymentEvent]) -> Vec<PaymentStatus> {
        events
            .iter()
            .filter_map(|event| match event {
                PaymentEvent::StatusChanged { status, .. } => Some(*status),
                PaymentEvent::MailRequested { .. } => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn mismatched_amount_is_rejected_without_consuming_the_key() {
        let account_id = Uuid::new_v4();
        let stored = payment_row(account_id, "ORD-1", 10000, PaymentStatus::Ready);
        let in_progress = with_status(&stored, PaymentStatus::InProgress);
        let done = PaymentEntity {
            payment_key: Some("pk_1".to_string()),
            method: Some("CARD".to_string()),
            approved_at: Some(Utc::now()),
            ..with_status(&stored, PaymentStatus::Done)
        };
        let plan_id = stored.plan_id;

        let mut fx = Fixture::new();
        fx.payments
            .expect_find_by_order_id()
            .withf(|order_id| order_id == "ORD-1")
            .times(2)
            .returning(move |_| Ok(Some(stored.clone())));
        fx.payments
            .expect_mark_in_progress()
            .withf(|order_id, payment_key| order_id == "ORD-1" && payment_key == "pk_1")
            .times(1)
            .returning(move |_, _| Ok(TransitionOutcome::Applied(in_progress.clone())));
        fx.gateway
            .expect_confirm_payment()
            .withf(|_, order_id, amount| order_id == "ORD-1" && *amount == 10000)
            .times(1)
            .returning(|_, _, _| Ok(approval()));
        fx.payments
            .expect_complete()
            .times(1)
            .returning(move |_, _| {
                Ok(CompletionOutcome::Granted {
                    payment: done.clone(),
                    entitlement: entitlement(plan_id),
                })
            });
        let (pipeline, mut rx) = fx.build();

        let stale = pipeline
            .confirm(command(account_id, "K1", "ORD-1", 9999))
            .await;
        assert!(matches!(
            stale,
            Err(PaymentError::StaleOrMismatchedAmount {
                expected: 10000,
                claimed: 9999
            })
        ));

        let confirmed = pipeline
            .confirm(command(account_id, "K1", "ORD-1", 10000))
            .await
            .unwrap();
        assert_eq!(confirmed.status, PaymentStatus::Done);
        assert_eq!(
            confirmed.entitlement.map(|entitlement| entitlement.plan_id),
            Some(plan_id)
        );

        let events = drain(&mut rx);
        assert_eq!(
            statuses(&events),
            vec![PaymentStatus::InProgress, PaymentStatus::Done]
        );
        assert!(matches!(
            events.last(),
            Some(PaymentEvent::MailRequested { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_prepares_with_one_key_admit_exactly_one() {
        let account_id = Uuid::new_v4();
        let stored = payment_row(account_id, "ORD-7", 5000, PaymentStatus::Ready);
        let in_progress = with_status(&stored, PaymentStatus::InProgress);

        let mut fx = Fixture::new();
        fx.payments
            .expect_find_by_order_id()
            .returning(move |_| Ok(Some(stored.clone())));
        fx.payments
            .expect_mark_in_progress()
            .times(1)
            .returning(move |_, _| Ok(TransitionOutcome::Applied(in_progress.clone())));
        let (pipeline, _rx) = fx.build();
        let pipeline = Arc::new(pipeline);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    pipeline
                        .prepare(&command(account_id, "K-same", "ORD-7", 5000))
                        .await
                })
            })
            .collect();

        let mut admitted = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(PaymentError::DuplicateRequest) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(duplicates, 7);
    }

    #[tokio::test]
    async fn prepare_exhaustion_releases_the_key_and_keeps_row_ready() {
        let account_id = Uuid::new_v4();
        let stored = payment_row(account_id, "ORD-2", 5000, PaymentStatus::Ready);

        let mut fx = Fixture::new();
        fx.payments
            .expect_find_by_order_id()
            .returning(move |_| Ok(Some(stored.clone())));
        fx.payments
            .expect_mark_in_progress()
            .times(3)
            .returning(|_, _| Err(anyhow::anyhow!("deadlock detected")));
        fx.payments.expect_finalize_failure().never();
        let (pipeline, _rx) = fx.build();

        let result = pipeline
            .prepare(&command(account_id, "K2", "ORD-2", 5000))
            .await;
        assert!(matches!(result, Err(PaymentError::PreparationFailed)));

        let again = pipeline
            .idempotency
            .check_and_reserve(CONFIRM_SCOPE, "K2", Duration::from_secs(1))
            .await;
        assert!(matches!(again, Reservation::Fresh(_)));
    }

    #[tokio::test]
    async fn gateway_rejection_fails_without_compensation() {
        let account_id = Uuid::new_v4();
        let stored = payment_row(account_id, "ORD-3", 5000, PaymentStatus::Ready);
        let in_progress = with_status(&stored, PaymentStatus::InProgress);
        let failed = with_status(&stored, PaymentStatus::Failed);

        let mut fx = Fixture::new();
        fx.payments
            .expect_find_by_order_id()
            .returning(move |_| Ok(Some(stored.clone())));
        fx.payments
            .expect_mark_in_progress()
            .returning(move |_, _| Ok(TransitionOutcome::Applied(in_progress.clone())));
        fx.gateway.expect_confirm_payment().returning(|_, _, _| {
            Err(GatewayError::Rejected {
                code: "REJECT_CARD_COMPANY".to_string(),
                message: "declined".to_string(),
            })
        });
        fx.gateway.expect_cancel_payment().never();
        fx.payments
            .expect_finalize_failure()
            .withf(|order_id, stage, _| {
                order_id == "ORD-3" && *stage == FailureStage::GatewayRejected
            })
            .times(1)
            .returning(move |_, _, _| Ok(TransitionOutcome::Applied(failed.clone())));
        let (pipeline, mut rx) = fx.build();

        let result = pipeline
            .confirm(command(account_id, "K3", "ORD-3", 5000))
            .await;
        assert!(matches!(
            result,
            Err(PaymentError::GatewayRejected { ref code, .. }) if code == "REJECT_CARD_COMPANY"
        ));
        assert_eq!(
            statuses(&drain(&mut rx)),
            vec![PaymentStatus::InProgress, PaymentStatus::Failed]
        );
    }

    #[tokio::test]
    async fn gateway_timeout_cancels_then_fails() {
        let account_id = Uuid::new_v4();
        let stored = payment_row(account_id, "ORD-4", 5000, PaymentStatus::Ready);
        let in_progress = with_status(&stored, PaymentStatus::InProgress);
        let failed = with_status(&stored, PaymentStatus::Failed);

        let mut fx = Fixture::new();
        fx.payments
            .expect_find_by_order_id()
            .returning(move |_| Ok(Some(stored.clone())));
        fx.payments
            .expect_mark_in_progress()
            .returning(move |_, _| Ok(TransitionOutcome::Applied(in_progress.clone())));
        fx.gateway
            .expect_confirm_payment()
            .returning(|_, _, _| Err(GatewayError::Timeout));
        fx.gateway
            .expect_cancel_payment()
            .withf(|payment_key, _| payment_key == "pk_1")
            .times(1)
            .returning(|_, _| Ok(()));
        fx.payments
            .expect_finalize_failure()
            .withf(|_, stage, _| *stage == FailureStage::GatewayOutcomeUnknown)
            .times(1)
            .returning(move |_, _, _| Ok(TransitionOutcome::Applied(failed.clone())));
        let (pipeline, _rx) = fx.build();

        let result = pipeline
            .confirm(command(account_id, "K4", "ORD-4", 5000))
            .await;
        assert!(matches!(result, Err(PaymentError::GatewayUnavailable)));
    }

    #[tokio::test]
    async fn completion_failure_after_approval_aborts_and_compensates() {
        let account_id = Uuid::new_v4();
        let stored = payment_row(account_id, "ORD-5", 5000, PaymentStatus::Ready);
        let in_progress = with_status(&stored, PaymentStatus::InProgress);
        let aborted = with_status(&stored, PaymentStatus::Aborted);

        let mut fx = Fixture::new();
        fx.payments
            .expect_find_by_order_id()
            .returning(move |_| Ok(Some(stored.clone())));
        fx.payments
            .expect_mark_in_progress()
            .returning(move |_, _| Ok(TransitionOutcome::Applied(in_progress.clone())));
        fx.gateway
            .expect_confirm_payment()
            .returning(|_, _, _| Ok(approval()));
        fx.payments
            .expect_complete()
            .times(3)
            .returning(|_, _| Err(anyhow::anyhow!("connection reset")));
        fx.gateway
            .expect_cancel_payment()
            .times(1)
            .returning(|_, _| Ok(()));
        fx.payments
            .expect_finalize_failure()
            .withf(|_, stage, _| *stage == FailureStage::Completion)
            .times(1)
            .returning(move |_, _, _| Ok(TransitionOutcome::Applied(aborted.clone())));
        let (pipeline, mut rx) = fx.build();

        let result = pipeline
            .confirm(command(account_id, "K5", "ORD-5", 5000))
            .await;
        assert!(matches!(result, Err(PaymentError::CompletionFailed)));

        let last = statuses(&drain(&mut rx)).pop();
        assert!(matches!(
            last,
            Some(PaymentStatus::Aborted | PaymentStatus::Failed)
        ));
    }

    #[tokio::test]
    async fn missing_entitlement_surfaces_granted_info_missing() {
        let account_id = Uuid::new_v4();
        let stored = payment_row(account_id, "ORD-6", 5000, PaymentStatus::Ready);
        let in_progress = with_status(&stored, PaymentStatus::InProgress);
        let aborted = with_status(&stored, PaymentStatus::Aborted);

        let mut fx = Fixture::new();
        fx.payments
            .expect_find_by_order_id()
            .returning(move |_| Ok(Some(stored.clone())));
        fx.payments
            .expect_mark_in_progress()
            .returning(move |_, _| Ok(TransitionOutcome::Applied(in_progress.clone())));
        fx.gateway
            .expect_confirm_payment()
            .returning(|_, _, _| Ok(approval()));
        fx.payments
            .expect_complete()
            .times(1)
            .returning(|_, _| Ok(CompletionOutcome::GrantMissing));
        fx.gateway
            .expect_cancel_payment()
            .times(1)
            .returning(|_, _| Ok(()));
        fx.payments
            .expect_finalize_failure()
            .times(1)
            .returning(move |_, _, _| Ok(TransitionOutcome::Applied(aborted.clone())));
        let (pipeline, _rx) = fx.build();

        let result = pipeline
            .confirm(command(account_id, "K6", "ORD-6", 5000))
            .await;
        assert!(matches!(result, Err(PaymentError::GrantedInfoMissing)));
    }

    #[tokio::test]
    async fn unrecordable_failure_reports_still_processing() {
        let account_id = Uuid::new_v4();
        let stored = payment_row(account_id, "ORD-8", 5000, PaymentStatus::Ready);
        let in_progress = with_status(&stored, PaymentStatus::InProgress);

        let mut fx = Fixture::new();
        fx.payments
            .expect_find_by_order_id()
            .returning(move |_| Ok(Some(stored.clone())));
        fx.payments
            .expect_mark_in_progress()
            .returning(move |_, _| Ok(TransitionOutcome::Applied(in_progress.clone())));
        fx.gateway.expect_confirm_payment().returning(|_, _, _| {
            Err(GatewayError::Rejected {
                code: "INVALID_CARD".to_string(),
                message: "invalid".to_string(),
            })
        });
        fx.payments
            .expect_finalize_failure()
            .times(3)
            .returning(|_, _, _| Err(anyhow::anyhow!("database unavailable")));
        let (pipeline, _rx) = fx.build();

        let result = pipeline
            .confirm(command(account_id, "K8", "ORD-8", 5000))
            .await;
        assert!(matches!(result, Err(PaymentError::StillProcessing)));
        assert_eq!(
            PaymentError::StillProcessing.status_code(),
            StatusCode::ACCEPTED
        );
    }

    #[tokio::test]
    async fn request_payment_uses_plan_price() {
        let account_id = Uuid::new_v4();
        let monthly = plan(9900);
        let plan_id = monthly.id;

        let mut fx = Fixture::new();
        fx.plans
            .expect_find_active_plan_by_id()
            .with(eq(plan_id))
            .returning(move |_| Ok(Some(monthly.clone())));
        fx.payments
            .expect_insert()
            .withf(move |insert| {
                insert.total_amount == 9900
                    && insert.status == "READY"
                    && insert.order_id.starts_with("ORD-")
            })
            .returning(move |insert| {
                let mut row = payment_row(
                    account_id,
                    &insert.order_id,
                    insert.total_amount,
                    PaymentStatus::Ready,
                );
                row.plan_id = insert.plan_id;
                Ok(row)
            });
        let (pipeline, _rx) = fx.build();

        let requested = pipeline.request_payment(account_id, plan_id).await.unwrap();
        assert_eq!(requested.amount, 9900);
        assert_eq!(requested.status, PaymentStatus::Ready);

        let mut fx = Fixture::new();
        fx.plans
            .expect_find_active_plan_by_id()
            .returning(|_| Ok(None));
        let (pipeline, _rx) = fx.build();
        assert!(matches!(
            pipeline.request_payment(account_id, Uuid::new_v4()).await,
            Err(PaymentError::PlanNotFound)
        ));
    }

    #[tokio::test]
    async fn billing_key_failure_aborts_the_request_row() {
        let account_id = Uuid::new_v4();
        let monthly = plan(9900);
        let aborted_order = Arc::new(std::sync::Mutex::new(String::new()));
        let captured = Arc::clone(&aborted_order);

        let mut fx = Fixture::new();
        fx.plans
            .expect_find_active_plan_by_id()
            .returning(move |_| Ok(Some(monthly.clone())));
        fx.payments.expect_insert().returning(move |insert| {
            *captured.lock().unwrap() = insert.order_id.clone();
            Ok(payment_row(
                account_id,
                &insert.order_id,
                insert.total_amount,
                PaymentStatus::Ready,
            ))
        });
        fx.gateway
            .expect_issue_billing_key()
            .returning(|_, _, _| Err(GatewayError::Unavailable("502".to_string())));
        fx.payments.expect_mark_billing_ready().never();
        fx.payments
            .expect_finalize_failure()
            .withf(|_, stage, _| *stage == FailureStage::BillingKeyIssue)
            .times(1)
            .returning(move |order_id, _, _| {
                Ok(TransitionOutcome::Applied(payment_row(
                    account_id,
                    order_id,
                    9900,
                    PaymentStatus::Aborted,
                )))
            });
        let (pipeline, _rx) = fx.build();

        let result = pipeline
            .issue_billing_key(
                account_id,
                IssueBillingKeyModel {
                    plan_id: Uuid::new_v4(),
                    customer_key: "cust_1".to_string(),
                    auth_key: "auth_1".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(PaymentError::BillingKeyIssueFailed)));
        assert!(aborted_order.lock().unwrap().starts_with("ORD-"));
    }

    #[tokio::test]
    async fn renewal_is_skipped_when_a_later_period_exists() {
        let now = Utc::now();
        let subscription = SubscriptionEntity {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            payment_id: None,
            started_at: now - ChronoDuration::days(29),
            expired_at: now + ChronoDuration::days(1),
            status: "ACTIVE".to_string(),
            auto_renew: true,
            created_at: now,
            updated_at: now,
        };

        let mut fx = Fixture::new();
        fx.subscriptions
            .expect_has_active_after()
            .with(eq(subscription.account_id), eq(subscription.expired_at))
            .returning(|_, _| Ok(true));
        fx.payments.expect_insert().never();
        fx.gateway.expect_charge_billing_key().never();
        let (pipeline, _rx) = fx.build();

        assert_eq!(
            pipeline.charge_renewal(&subscription).await.unwrap(),
            RenewalOutcome::AlreadyRenewed
        );
    }

    /// Approves after a delay, like a gateway that is slow to answer.
    struct SlowGateway {
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl PaymentGateway for SlowGateway {
        async fn confirm_payment(
            &self,
            _payment_key: &str,
            _order_id: &str,
            _amount: i64,
        ) -> Result<PaymentApproval, GatewayError> {
            tokio::time::sleep(self.delay).await;
            Ok(approval())
        }

        async fn issue_billing_key(
            &self,
            _customer_key: &str,
            _auth_key: &str,
            _order_id: &str,
        ) -> Result<String, GatewayError> {
            tokio::time::sleep(self.delay).await;
            Ok("bk_1".to_string())
        }

        async fn charge_billing_key(
            &self,
            _billing_key: &str,
            _customer_key: &str,
            _order_id: &str,
            _amount: i64,
        ) -> Result<PaymentApproval, GatewayError> {
            Err(GatewayError::Unavailable("not used".to_string()))
        }

        async fn cancel_payment(&self, _payment_key: &str, _reason: &str) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn abandoned_confirm_still_completes() {
        let account_id = Uuid::new_v4();
        let stored = payment_row(account_id, "ORD-9", 5000, PaymentStatus::Ready);
        let in_progress = with_status(&stored, PaymentStatus::InProgress);
        let done = with_status(&stored, PaymentStatus::Done);
        let plan_id = stored.plan_id;

        let mut fx = Fixture::new();
        fx.payments
            .expect_find_by_order_id()
            .returning(move |_| Ok(Some(stored.clone())));
        fx.payments
            .expect_mark_in_progress()
            .times(1)
            .returning(move |_, _| Ok(TransitionOutcome::Applied(in_progress.clone())));
        fx.payments.expect_complete().times(1).returning(move |_, _| {
            Ok(CompletionOutcome::Granted {
                payment: done.clone(),
                entitlement: entitlement(plan_id),
            })
        });
        fx.payments.expect_finalize_failure().never();
        let (pipeline, mut rx) = fx.build_with_gateway(Arc::new(SlowGateway {
            delay: Duration::from_millis(150),
        }));
        let pipeline = Arc::new(pipeline);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            pipeline.confirm_detached(command(account_id, "K9", "ORD-9", 5000)),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            statuses(&drain(&mut rx)),
            vec![PaymentStatus::InProgress, PaymentStatus::Done]
        );
    }

    #[tokio::test]
    async fn abandoned_billing_key_issuance_still_stores_the_key() {
        let account_id = Uuid::new_v4();
        let plan = plan(9900);
        let plan_id = plan.id;
        let ready = PaymentEntity {
            plan_id,
            ..payment_row(account_id, "ORD-10", 9900, PaymentStatus::Ready)
        };
        let billing_ready = with_status(&ready, PaymentStatus::AutoBillingReady);

        let mut fx = Fixture::new();
        fx.plans
            .expect_find_active_plan_by_id()
            .with(eq(plan_id))
            .returning(move |_| Ok(Some(plan.clone())));
        fx.payments
            .expect_insert()
            .times(1)
            .returning(move |_| Ok(ready.clone()));
        fx.payments
            .expect_mark_billing_ready()
            .withf(|order_id, billing_key, _| order_id == "ORD-10" && billing_key == "bk_1")
            .times(1)
            .returning(move |_, _, _| Ok(TransitionOutcome::Applied(billing_ready.clone())));
        fx.subscriptions
            .expect_enable_auto_renew()
            .with(eq(account_id))
            .times(1)
            .returning(|_| Ok(true));
        let (pipeline, mut rx) = fx.build_with_gateway(Arc::new(SlowGateway {
            delay: Duration::from_millis(150),
        }));
        let pipeline = Arc::new(pipeline);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            pipeline.issue_billing_key_detached(
                account_id,
                IssueBillingKeyModel {
                    plan_id,
                    customer_key: "cust_1".to_string(),
                    auth_key: "auth_1".to_string(),
                },
            ),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            statuses(&drain(&mut rx)),
            vec![PaymentStatus::Ready, PaymentStatus::AutoBillingReady]
        );
    }

    #[tokio::test]
    async fn unreadable_order_is_a_preparation_failure() {
        let mut fx = Fixture::new();
        fx.payments
            .expect_find_by_order_id()
            .times(3)
            .returning(|_| Err(anyhow::anyhow!("connection pool exhausted")));
        fx.payments.expect_mark_in_progress().never();
        let (pipeline, _rx) = fx.build();

        let result = pipeline
            .confirm(command(Uuid::new_v4(), "K11", "ORD-11", 5000))
            .await;
        assert!(matches!(result, Err(PaymentError::PreparationFailed)));
        assert_eq!(result.unwrap_err().status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn rejected_renewal_fails_without_compensation() {
        let subscription_id = Uuid::new_v4();
        let account_id = Uuid::new_v4();
        let plan = plan(9900);
        let plan_id = plan.id;
        let now = Utc::now();
        let subscription = SubscriptionEntity {
            id: subscription_id,
            account_id,
            plan_id,
            payment_id: None,
            started_at: now - ChronoDuration::days(29),
            expired_at: now + ChronoDuration::days(1),
            status: "ACTIVE".to_string(),
            auto_renew: true,
            created_at: now,
            updated_at: now,
        };
        let source = PaymentEntity {
            billing_key: Some("bk_1".to_string()),
            customer_key: Some("cust_1".to_string()),
            ..payment_row(account_id, "ORD-12", 9900, PaymentStatus::AutoBillingReady)
        };
        let charge_row = payment_row(account_id, "ORD-13", 9900, PaymentStatus::AutoBillingReady);
        let failed = with_status(&charge_row, PaymentStatus::Failed);

        let mut fx = Fixture::new();
        fx.subscriptions
            .expect_has_active_after()
            .returning(|_, _| Ok(false));
        fx.payments
            .expect_find_latest_billing_key()
            .returning(move |_| Ok(Some(source.clone())));
        fx.plans
            .expect_find_active_plan_by_id()
            .returning(move |_| Ok(Some(plan.clone())));
        fx.payments
            .expect_insert()
            .returning(move |_| Ok(charge_row.clone()));
        fx.gateway.expect_charge_billing_key().returning(|_, _, _, _| {
            Err(GatewayError::Rejected {
                code: "EXCEED_MAX_AMOUNT".to_string(),
                message: "limit exceeded".to_string(),
            })
        });
        fx.gateway.expect_cancel_payment().never();
        fx.payments
            .expect_finalize_failure()
            .withf(|order_id, stage, reason| {
                order_id == "ORD-13"
                    && *stage == FailureStage::GatewayRejected
                    && reason.contains("EXCEED_MAX_AMOUNT")
            })
            .times(1)
            .returning(move |_, _, _| Ok(TransitionOutcome::Applied(failed.clone())));
        let (pipeline, _rx) = fx.build();

        let result = pipeline.charge_renewal(&subscription).await;
        assert!(matches!(
            result,
            Err(PaymentError::GatewayRejected { ref code, .. }) if code == "EXCEED_MAX_AMOUNT"
        ));
    }
}
