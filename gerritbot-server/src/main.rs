//! gerritbot
//!
//! Relays Gerrit code-review events to IRC channels.

mod config;
mod irc;
mod shutdown;

use clap::Parser;
use config::{ConfigLoader, LoadedConfig, SourceConfig};
use gerritbot_core::events::{delivery_channel, gerrit_event_channel};
use gerritbot_core::processors::{
    ChannelSender, EventRouter, GerritMqttSource, GerritSshSource, SourceRunner,
};
use irc::IrcClient;
use shutdown::shutdown_signal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "info,rumqttc=warn";

/// gerritbot - Gerrit event relay for IRC
#[derive(Parser, Debug)]
#[command(name = "gerritbot")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "GERRITBOT_CONFIG", default_value = "./gerritbot.toml")]
    config: PathBuf,

    /// Override the channel config path from the configuration file
    #[arg(long)]
    channel_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration; the log filter lives in it
    let config_loader = ConfigLoader::new(&args.config, args.channel_config);
    let loaded = match config_loader.load() {
        Ok(loaded) => {
            init_tracing(loaded.log_filter.as_deref());
            loaded
        }
        Err(e) => {
            init_tracing(None);
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting gerritbot v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Configuration loaded from {:?}, {} channels from {:?}",
        args.config,
        loaded.channels.all_channels().len(),
        loaded.channel_config_path
    );

    run(loaded).await
}

async fn run(loaded: LoadedConfig) -> anyhow::Result<()> {
    let LoadedConfig {
        irc,
        source,
        sender,
        channels,
        ..
    } = loaded;

    // An unreachable chat server at startup is fatal; later losses reconnect
    let mut chat = IrcClient::new(irc);
    chat.connect().await.map_err(|e| {
        tracing::error!("Failed to connect to IRC server: {}", e);
        e
    })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (event_tx, event_rx) = gerrit_event_channel();
    let (delivery_tx, delivery_rx) = delivery_channel();

    let sender = ChannelSender::new(chat, channels.all_channels().clone(), sender);
    let router = EventRouter::new(Arc::new(channels));

    let source_handle = match source {
        SourceConfig::Ssh(params) => tokio::spawn(
            SourceRunner::new(GerritSshSource::new(params)).run(shutdown_rx.clone(), event_tx),
        ),
        SourceConfig::Mqtt(params) => tokio::spawn(
            SourceRunner::new(GerritMqttSource::new(params)).run(shutdown_rx.clone(), event_tx),
        ),
    };
    let router_handle = tokio::spawn(router.run(shutdown_rx.clone(), event_rx, delivery_tx));
    let sender_handle = tokio::spawn(sender.run(shutdown_rx, delivery_rx));

    let result = shutdown_signal().await;
    if let Err(e) = &result {
        tracing::error!("Failed to install signal handlers: {}", e);
    }

    let _ = shutdown_tx.send(true);
    for (name, handle) in [
        ("event source", source_handle),
        ("router", router_handle),
        ("channel sender", sender_handle),
    ] {
        if let Err(e) = handle.await {
            tracing::error!("{} task failed: {}", name, e);
        }
    }
    tracing::info!("Shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(configured: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(configured.unwrap_or(DEFAULT_LOG_FILTER)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
