use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use url::Url;

use crate::domain::{
    repositories::payment_gateway::{GatewayError, PaymentGateway},
    value_objects::payments::PaymentApproval,
};

/// HTTP client for the card payment gateway. Authenticates with the secret
/// key as the Basic auth user and an empty password.
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: Url,
    authorization: String,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentResponse {
    payment_key: String,
    method: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    receipt: Option<Receipt>,
}

#[derive(Debug, Deserialize)]
struct Receipt {
    url: Option<String>,
}

impl From<PaymentResponse> for PaymentApproval {
    fn from(value: PaymentResponse) -> Self {
        Self {
            payment_key: value.payment_key,
            method: value.method.unwrap_or_else(|| "UNKNOWN".to_string()),
            approved_at: value.approved_at.unwrap_or_else(Utc::now),
            receipt_url: value.receipt.and_then(|receipt| receipt.url),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BillingKeyResponse {
    billing_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmRequest<'a> {
    payment_key: &'a str,
    order_id: &'a str,
    amount: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IssueBillingKeyRequest<'a> {
    customer_key: &'a str,
    auth_key: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChargeRequest<'a> {
    customer_key: &'a str,
    order_id: &'a str,
    amount: i64,
    order_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelRequest<'a> {
    cancel_reason: &'a str,
}

impl GatewayClient {
    pub fn new(base_url: &str, secret_key: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).context("gateway: invalid base url")?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("gateway: failed to build http client")?;
        let authorization = format!("Basic {}", STANDARD.encode(format!("{secret_key}:")));

        Ok(Self {
            http,
            base_url,
            authorization,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|err| GatewayError::Unavailable(format!("invalid endpoint {path}: {err}")))
    }

    async fn post<B, R>(
        &self,
        path: &str,
        body: &B,
        idempotency_key: Option<&str>,
        context: &str,
    ) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let mut request = self
            .http
            .post(self.endpoint(path)?)
            .header(AUTHORIZATION, &self.authorization)
            .header(CONTENT_TYPE, "application/json")
            .json(body);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let resp = request.send().await.map_err(classify_transport_error)?;
        let resp = ensure_success(resp, context).await?;
        resp.json::<R>().await.map_err(|err| {
            GatewayError::Unavailable(format!("{context}: unreadable response: {err}"))
        })
    }
}

fn classify_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

/// 4xx responses are explicit rejections. Anything else leaves the outcome unknown.
fn classify_status(status: reqwest::StatusCode, body: &str) -> GatewayError {
    let parsed = serde_json::from_str::<GatewayErrorBody>(body).ok();
    if status.is_client_error() {
        let (code, message) = parsed
            .map(|body| (body.code, body.message))
            .unwrap_or((None, None));
        GatewayError::Rejected {
            code: code.unwrap_or_else(|| status.as_u16().to_string()),
            message: message.unwrap_or_else(|| body.to_string()),
        }
    } else {
        GatewayError::Unavailable(format!("status {status}"))
    }
}

async fn ensure_success(
    resp: reqwest::Response,
    context: &str,
) -> Result<reqwest::Response, GatewayError> {
    if resp.status().is_success() {
        return Ok(resp);
    }

    let status = resp.status();
    let body = match resp.text().await {
        Ok(text) if !text.is_empty() => text,
        Ok(_) => "<empty response body>".to_string(),
        Err(err) => format!("<failed to read response body: {err}>"),
    };

    let classified = classify_status(status, &body);
    match &classified {
        GatewayError::Rejected { code, .. } => {
            warn!(
                status = %status,
                code = %code,
                context = %context,
                "gateway: request rejected"
            );
        }
        _ => {
            error!(
                status = %status,
                response_body = %body,
                context = %context,
                "gateway: request failed"
            );
        }
    }
    Err(classified)
}

#[async_trait]
impl PaymentGateway for GatewayClient {
    async fn confirm_payment(
        &self,
        payment_key: &str,
        order_id: &str,
        amount: i64,
    ) -> Result<PaymentApproval, GatewayError> {
        let body = ConfirmRequest {
            payment_key,
            order_id,
            amount,
        };
        let resp: PaymentResponse = self
            .post("v1/payments/confirm", &body, Some(order_id), "confirm payment")
            .await?;
        Ok(resp.into())
    }

    async fn issue_billing_key(
        &self,
        customer_key: &str,
        auth_key: &str,
        order_id: &str,
    ) -> Result<String, GatewayError> {
        let body = IssueBillingKeyRequest {
            customer_key,
            auth_key,
        };
        let resp: BillingKeyResponse = self
            .post(
                "v1/billing/authorizations/issue",
                &body,
                Some(order_id),
                "issue billing key",
            )
            .await?;
        Ok(resp.billing_key)
    }

    async fn charge_billing_key(
        &self,
        billing_key: &str,
        customer_key: &str,
        order_id: &str,
        amount: i64,
    ) -> Result<PaymentApproval, GatewayError> {
        let body = ChargeRequest {
            customer_key,
            order_id,
            amount,
            order_name: "subscription renewal",
        };
        let resp: PaymentResponse = self
            .post(
                &format!("v1/billing/{billing_key}"),
                &body,
                Some(order_id),
                "charge billing key",
            )
            .await?;
        Ok(resp.into())
    }

    async fn cancel_payment(&self, payment_key: &str, reason: &str) -> Result<(), GatewayError> {
        let body = CancelRequest {
            cancel_reason: reason,
        };
        let _: serde_json::Value = self
            .post(
                &format!("v1/payments/{payment_key}/cancel"),
                &body,
                None,
                "cancel payment",
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn client_errors_are_rejections_with_gateway_code() {
        let err = classify_status(
            StatusCode::BAD_REQUEST,
            r#"{"code":"REJECT_CARD_COMPANY","message":"card declined"}"#,
        );
        assert_eq!(
            err,
            GatewayError::Rejected {
                code: "REJECT_CARD_COMPANY".to_string(),
                message: "card declined".to_string(),
            }
        );
        assert!(!err.outcome_unknown());
    }

    #[test]
    fn server_errors_leave_outcome_unknown() {
        let err = classify_status(StatusCode::BAD_GATEWAY, "upstream");
        assert!(matches!(err, GatewayError::Unavailable(_)));
        assert!(err.outcome_unknown());
    }

    #[test]
    fn approval_is_read_from_payment_response() {
        let resp: PaymentResponse = serde_json::from_str(
            r#"{
                "paymentKey": "pk_1",
                "method": "CARD",
                "approvedAt": "2026-01-02T03:04:05+00:00",
                "receipt": {"url": "https://receipts.example/pk_1"}
            }"#,
        )
        .unwrap();
        let approval = PaymentApproval::from(resp);

        assert_eq!(approval.payment_key, "pk_1");
        assert_eq!(approval.method, "CARD");
        assert_eq!(
            approval.receipt_url.as_deref(),
            Some("https://receipts.example/pk_1")
        );
    }

    #[test]
    fn basic_auth_uses_secret_key_with_empty_password() {
        let client =
            GatewayClient::new("https://gateway.example/", "sk_test", Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.authorization, "Basic c2tfdGVzdDo=");
    }
}
