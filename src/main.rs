mod config;
mod discord;
mod discord_log;
mod relay;

use std::sync::Arc;

use serenity::all::Http;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use config::Config;
use discord::DiscordGateway;
use relay::{InboundSource, Relay};

fn init_logging(config: &Config) -> Option<WorkerGuard> {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        );

    let mut open_error = None;
    let (file_layer, guard) = match config.log_dir.as_ref().map(|dir| {
        std::fs::create_dir_all(dir)?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("medic-relay.log"))
    }) {
        Some(Ok(file)) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                );
            (Some(layer), Some(guard))
        }
        Some(Err(e)) => {
            open_error = Some(e);
            (None, None)
        }
        None => (None, None),
    };

    let discord_layer = config.log_channel.map(|channel| {
        let http = Arc::new(Http::new(&config.bot_token));
        discord_log::DiscordLogLayer::new(http, channel)
    });

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .with(discord_layer)
        .init();

    if let Some(e) = open_error {
        warn!("Log file disabled: {e}");
    }

    guard
}

#[tokio::main]
async fn main() {
    let loaded = match std::env::args().nth(1) {
        Some(path) => Config::load(&path),
        None => Config::from_env(),
    };
    let config = match loaded {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("[FATAL] {e}. Exiting.");
            std::process::exit(1);
        }
    };

    let guard = init_logging(&config);

    info!(
        token = %config.masked_token(),
        source = %config.source_channel,
        destination = %config.destination_channel,
        pattern = %config.pattern,
        role = ?config.role_id.map(|r| r.get()),
        threads = config.include_threads,
        embeds = config.scan_embeds,
        "🚀 Starting medic-relay"
    );

    let gateway = DiscordGateway::new(config.bot_token.clone());
    let relay = Arc::new(Relay::new(config));

    if let Err(e) = gateway.subscribe(relay).await {
        error!("Discord client stopped: {e}");
        drop(guard);
        std::process::exit(1);
    }
}
