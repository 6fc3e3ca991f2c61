use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use reqwest::Client;
use url::Url;

use super::discord::{send_discord_webhook, webhook_client};

/// Operator alert sink used when automated recovery has given up.
#[automock]
#[async_trait]
pub trait NotificationChannel {
    async fn notify(&self, title: &str, message: &str) -> Result<()>;
}

pub struct DiscordNotificationChannel {
    webhook_url: Url,
    client: Client,
}

impl DiscordNotificationChannel {
    pub fn new(webhook_url: Url, timeout: Duration) -> Result<Self> {
        Ok(Self {
            webhook_url,
            client: webhook_client(timeout)?,
        })
    }
}

#[async_trait]
impl NotificationChannel for DiscordNotificationChannel {
    async fn notify(&self, title: &str, message: &str) -> Result<()> {
        let content = format!("**{title}**\n```\n{message}\n```");
        send_discord_webhook(&self.client, &self.webhook_url, &content).await
    }
}

/// Used when no alert webhook is configured. Alerts still reach the logs.
pub struct LogNotificationChannel;

#[async_trait]
impl NotificationChannel for LogNotificationChannel {
    async fn notify(&self, title: &str, message: &str) -> Result<()> {
        tracing::error!(%title, %message, "observability: alert raised without a channel");
        Ok(())
    }
}
