mod config;
mod dispatch;
mod filter;
mod format;
mod heartbeat;
mod media;
mod platform;
mod relay;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, LoggingConfig};
use crate::dispatch::{DestinationSet, Dispatcher, PostTemplate, RetryPolicy};
use crate::filter::FilterRules;
use crate::media::MediaAcquirer;
use crate::platform::discord::DiscordClient;
use crate::platform::telegram::TelegramClient;
use crate::platform::SecondaryClient;
use crate::relay::Relay;

/// Stdout logging plus the optional append-only file sink.
/// The returned guard flushes the file writer on drop.
fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tg_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let _log_guard = init_logging(&config.logging)?;

    let rules = FilterRules::from_config(&config.filter)?;
    let destinations = DestinationSet::from_config(&config);

    info!("Configuration loaded from {}", config_path.display());
    info!("  Source chats: {:?}", config.telegram.source_channels);
    info!("  Primary destination: {}", destinations.primary);
    info!("  Discord destinations: {:?}", destinations.secondary);
    info!("  Monitor words: {:?}", rules.monitor_words());
    info!("  Block keywords: {}", config.filter.block_keywords.len());

    let bot = Bot::new(&config.telegram.bot_token);
    let telegram = Arc::new(TelegramClient::new(bot.clone()));

    let discord: Option<Arc<dyn SecondaryClient>> = config.discord.as_ref().map(|d| {
        Arc::new(DiscordClient::new(d.bot_token.clone())) as Arc<dyn SecondaryClient>
    });
    let template = config
        .discord
        .as_ref()
        .map(PostTemplate::from_config)
        .unwrap_or_default();

    info!("  Fan-out: {} destinations", destinations.len());
    let dispatcher = Dispatcher::new(
        telegram.clone(),
        discord,
        destinations,
        RetryPolicy::new(config.delivery.max_attempts, config.delivery.backoff()),
        template,
    );
    let media = MediaAcquirer::new(config.media.directory.clone(), telegram);
    let relay = Arc::new(Relay::new(rules, media, dispatcher));

    let _heartbeat = heartbeat::start(relay.stats(), &config.logging.heartbeat).await?;

    info!("Relay is starting...");
    platform::telegram::run(bot, relay, &config.telegram.source_channels).await?;

    Ok(())
}
