use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use crates::{
    application::payments::{PaymentPipeline, PaymentPipelineSettings},
    domain::value_objects::payments::{
        ConfirmPaymentCommand, ConfirmPaymentModel, IssueBillingKeyModel, RequestPaymentModel,
    },
    infra::db::repositories::{
        payments::PaymentPostgres, plans::PlanPostgres, subscriptions::SubscriptionPostgres,
    },
    payments::gateway_client::GatewayClient,
    resilience::retry::RetryPolicy,
};
use tracing::info;

use crate::{
    auth::AuthUser,
    axum_http::{error_responses::AppError, http_serve::Infrastructure},
    config::config_model::DotEnvyConfig,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

pub fn pipeline_settings(config: &DotEnvyConfig) -> PaymentPipelineSettings {
    PaymentPipelineSettings {
        gateway_timeout: Duration::from_secs(config.gateway.timeout_secs),
        idempotency_ttl: Duration::from_secs(config.gateway.idempotency_ttl_secs),
        storage_retry: RetryPolicy::fixed(
            config.storage_retry.max_attempts,
            Duration::from_millis(config.storage_retry.backoff_ms),
        ),
    }
}

pub fn routes(config: Arc<DotEnvyConfig>, infra: &Infrastructure) -> Result<Router> {
    let gateway = GatewayClient::new(
        &config.gateway.base_url,
        &config.gateway.secret_key,
        Duration::from_secs(config.gateway.timeout_secs),
    )?;

    let pipeline = PaymentPipeline::new(
        Arc::new(PaymentPostgres::new(Arc::clone(&infra.db_pool))),
        Arc::new(PlanPostgres::new(Arc::clone(&infra.db_pool))),
        Arc::new(SubscriptionPostgres::new(Arc::clone(&infra.db_pool))),
        Arc::new(gateway),
        infra.idempotency_guard(),
        infra.events.clone(),
        pipeline_settings(&config),
    );

    Ok(Router::new()
        .route("/", post(request_payment))
        .route("/confirm", post(confirm_payment))
        .route("/billing-key", post(issue_billing_key))
        .with_state(Arc::new(pipeline)))
}

/// Reads the client-chosen dedup key. Missing, blank and oversized keys are rejected.
pub fn idempotency_key(headers: &HeaderMap) -> Result<String, AppError> {
    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .ok_or_else(|| AppError::BadRequest("Missing Idempotency-Key header".to_string()))?
        .to_str()
        .map_err(|_| AppError::BadRequest("Invalid Idempotency-Key header".to_string()))?
        .trim();

    if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(AppError::BadRequest(
            "Invalid Idempotency-Key header".to_string(),
        ));
    }
    Ok(key.to_string())
}

pub async fn request_payment(
    State(pipeline): State<Arc<PaymentPipeline>>,
    auth: AuthUser,
    Json(model): Json<RequestPaymentModel>,
) -> Result<impl IntoResponse, AppError> {
    let request = pipeline.request_payment(auth.user_id, model.plan_id).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn confirm_payment(
    State(pipeline): State<Arc<PaymentPipeline>>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(model): Json<ConfirmPaymentModel>,
) -> Result<impl IntoResponse, AppError> {
    let idempotency_key = idempotency_key(&headers)?;
    info!(
        account_id = %auth.user_id,
        order_id = %model.order_id,
        "payments router: confirm requested"
    );

    let result = pipeline
        .confirm_detached(ConfirmPaymentCommand {
            account_id: auth.user_id,
            idempotency_key,
            payment_key: model.payment_key,
            order_id: model.order_id,
            amount: model.amount,
        })
        .await?;

    Ok((StatusCode::OK, Json(result)))
}

pub async fn issue_billing_key(
    State(pipeline): State<Arc<PaymentPipeline>>,
    auth: AuthUser,
    Json(model): Json<IssueBillingKeyModel>,
) -> Result<impl IntoResponse, AppError> {
    let request = pipeline
        .issue_billing_key_detached(auth.user_id, model)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}
