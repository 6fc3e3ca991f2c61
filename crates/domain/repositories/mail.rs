use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

#[automock]
#[async_trait]
pub trait MailSender {
    async fn send_receipt(&self, address: &str, receipt_url: &str) -> Result<()>;
}
