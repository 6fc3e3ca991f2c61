use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use url::Url;

use crate::domain::repositories::mail::MailSender;

/// Transactional mail API client. Delivery itself is the provider's concern.
pub struct MailApiClient {
    http: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

#[derive(Serialize)]
struct ReceiptMail<'a> {
    to: &'a str,
    subject: &'a str,
    text: String,
}

impl MailApiClient {
    pub fn new(endpoint: &str, api_key: String) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: Url::parse(endpoint).context("mail: invalid api url")?,
            api_key,
        })
    }
}

#[async_trait]
impl MailSender for MailApiClient {
    async fn send_receipt(&self, address: &str, receipt_url: &str) -> Result<()> {
        let mail = ReceiptMail {
            to: address,
            subject: "Your payment receipt",
            text: format!("Thank you for your payment. Your receipt: {receipt_url}"),
        };

        let resp = self
            .http
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&mail)
            .send()
            .await
            .context("mail: request failed")?;

        if !resp.status().is_success() {
            bail!("mail: api responded with status {}", resp.status());
        }
        Ok(())
    }
}
