mod channel;
mod config;
mod discord;
mod layer;
mod notifier;

use anyhow::Result;
use config::ObservabilityConfig;
use discord::DiscordWebhookProvider;
use layer::ErrorNotifyLayer;
use notifier::Notifier;
use std::sync::Arc;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub use channel::{
    DiscordNotificationChannel, LogNotificationChannel, MockNotificationChannel, NotificationChannel,
};
pub use discord::send_discord_webhook;

/// Installs the global subscriber: RFC3339 local-time fmt output, `RUST_LOG`
/// filtering (default `info`) and, when configured, Discord forwarding of
/// events at or above `DISCORD_NOTIFY_LEVEL`.
///
/// Must run inside a tokio runtime when Discord forwarding is enabled.
pub fn init_observability(component: &str) -> Result<()> {
    let mut config = ObservabilityConfig::from_env(component);

    let notify_layer = match config.discord.as_ref() {
        Some(discord) => match DiscordWebhookProvider::new(discord.webhook_url.clone()) {
            Ok(provider) => {
                let notifier = Notifier::new(vec![Arc::new(provider)]);
                Some(
                    ErrorNotifyLayer::new(notifier, config.service_context.clone(), discord.min_level)
                        .with_filter(tracing_subscriber::filter::LevelFilter::from_level(
                            discord.min_level,
                        )),
                )
            }
            Err(err) => {
                config
                    .warnings
                    .push(format!("Discord notifications disabled: {err}"));
                None
            }
        },
        None => None,
    };
    let discord_enabled = notify_layer.is_some();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(notify_layer)
        .with(env_filter)
        .try_init()?;

    let context = &config.service_context;
    for warning in &config.warnings {
        warn!(
            service = %context.service_name,
            environment = %context.environment,
            component = %context.component,
            warning = %warning,
            "observability: config warning"
        );
    }

    info!(
        service = %context.service_name,
        environment = %context.environment,
        component = %context.component,
        discord_enabled,
        "observability: initialized"
    );

    Ok(())
}
