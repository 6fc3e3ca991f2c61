use super::notifier::{CORRELATION_FIELDS, NotificationEvent, NotificationProvider};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use url::Url;

const CONTENT_LIMIT: usize = 2000;


pub(crate) fn webhook_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("observability: failed to build webhook client")
}

/// Posts `content` to a Discord webhook. Errors never echo the URL.
pub async fn send_discord_webhook(client: &Client, webhook_url: &Url, content: &str) -> Result<()> {
    let response = client
        .post(webhook_url.clone())
        .json(&json!({ "content": truncate_for_discord(content) }))
        .send()
        .await
        .map_err(sanitize_reqwest_error)?;

    if response.status().is_success() {
        return Ok(());
    }

    Err(anyhow!(
        "discord webhook returned non-success status: {}",
        response.status()
    ))
}

pub(crate) struct DiscordWebhookProvider {
    webhook_url: Url,
    client: Client,
}

impl DiscordWebhookProvider {
    pub(crate) fn new(webhook_url: Url) -> Result<Self> {
        Ok(Self {
            webhook_url,
            client: webhook_client(Duration::from_secs(3))?,
        })
    }
}

pub(crate) fn format_event(event: &NotificationEvent) -> String {
    let mut lines = vec![format!(
        "**{}** `{}` `{}` `{}`",
        event.service_name,
        event.environment,
        event.component,
        event.level.as_str()
    )];

    let location = match (&event.file, event.line) {
        (Some(file), Some(line)) => format!(" `{file}:{line}`"),
        _ => String::new(),
    };
    lines.push(format!(
        "`{}` `{}`{}",
        event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        event.target,
        location
    ));

    if let Some(message) = event.message.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        lines.push(format!("> {message}"));
    }

    if !event.spans.is_empty() {
        let chain = event
            .spans
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(" > ");
        lines.push(format!("spans: `{chain}`"));
    }

    if !event.fields.is_empty() {
        lines.push("fields:".to_string());
        let leading = CORRELATION_FIELDS
            .iter()
            .filter_map(|key| event.fields.get_key_value(*key));
        let rest = event
            .fields
            .iter()
            .filter(|(k, _)| !CORRELATION_FIELDS.contains(&k.as_str()));
        for (k, v) in leading.chain(rest) {
            lines.push(format!("- `{k}` = `{v}`"));
        }
    }

    for span in event.spans.iter().filter(|s| !s.fields.is_empty()) {
        lines.push(format!("span `{}`:", span.name));
        for (k, v) in &span.fields {
            lines.push(format!("- `{k}` = `{v}`"));
        }
    }

    lines.join("\n")
}

#[async_trait]
impl NotificationProvider for DiscordWebhookProvider {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        send_discord_webhook(&self.client, &self.webhook_url, &format_event(event)).await
    }

    fn provider_name(&self) -> &'static str {
        "discord"
    }
}

fn sanitize_reqwest_error(error: reqwest::Error) -> anyhow::Error {
    if error.is_timeout() {
        return anyhow!("discord webhook request timed out");
    }
    if error.is_connect() {
        return anyhow!("discord webhook connection failed");
    }
    anyhow!("discord webhook request failed")
}

fn truncate_for_discord(content: &str) -> String {
    const SUFFIX: &str = "\n… (truncated)";

    if content.chars().count() <= CONTENT_LIMIT {
        return content.to_string();
    }

    let allowed = CONTENT_LIMIT.saturating_sub(SUFFIX.chars().count());
    let mut truncated: String = content.chars().take(allowed).collect();
    truncated.push_str(SUFFIX);
    truncated
}
