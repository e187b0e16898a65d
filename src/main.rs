use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use c64_core::PetsciiFormatter;
use c64_feed::{PusherConfig, PusherConnector, RelayConfig, RelayEvent, UpstreamRelay};
use c64_settings::GatewaySettings;
use c64_telemetry::{LokiConfig, TelemetryConfig};
use clap::Parser;
use tokio::sync::broadcast;

/// Relays a Pusher chat channel to Commodore 64 terminals over raw TCP.
#[derive(Debug, Parser)]
#[command(name = "c64-relay", version)]
struct Args {
    /// Settings file (defaults to `~/.c64-relay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Override the terminal listener port.
    #[arg(long)]
    tcp_port: Option<u16>,

    /// Override the admin API port.
    #[arg(long)]
    api_port: Option<u16>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let path = args.settings.unwrap_or_else(c64_settings::settings_path);
    let mut settings = c64_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    if let Some(port) = args.tcp_port {
        settings.server.tcp_port = port;
    }
    if let Some(port) = args.api_port {
        settings.server.api_port = port;
    }

    let telemetry = c64_telemetry::init_telemetry(telemetry_config(&settings));
    tracing::info!(
        settings = %path.display(),
        environment = %settings.logging.environment,
        shipping = telemetry.is_shipping(),
        "starting c64 relay"
    );

    let (events, _) = broadcast::channel::<RelayEvent>(1024);
    let connector = PusherConnector::new(PusherConfig {
        key: settings.feed.pusher_key.clone(),
        cluster: settings.feed.pusher_cluster.clone(),
        channel: settings.feed.pusher_channel.clone(),
    });
    let relay = UpstreamRelay::new(
        Arc::new(connector),
        events,
        RelayConfig::new(settings.feed.pusher_channel.clone()),
    );

    let formatter = Arc::new(PetsciiFormatter::default());
    let config = c64_server::ServerConfig {
        bind_host: settings.server.bind_host.clone(),
        tcp_port: settings.server.tcp_port,
        api_port: settings.server.api_port,
        allowed_ips: settings.server.allowed_ips.clone(),
        app_version: settings.server.app_version.clone(),
    };
    let handle = c64_server::start(config, relay.clone(), formatter)
        .await
        .context("failed to start gateway")?;
    relay.start();

    tracing::info!(
        tcp_port = handle.tcp_port,
        api_port = handle.api_port,
        "c64 relay ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    let _ = handle.shutdown();
    relay.shutdown();
    telemetry.shutdown().await;
    Ok(())
}

fn telemetry_config(settings: &GatewaySettings) -> TelemetryConfig {
    let logging = &settings.logging;
    let log_level = logging.level.parse().unwrap_or(tracing::Level::INFO);

    let loki = match (&logging.loki.url, &logging.loki.user, &logging.loki.token) {
        (Some(url), Some(user), Some(token)) if logging.loki.is_enabled(&logging.environment) => {
            let mut config = LokiConfig::new(url.clone(), user.clone(), token.clone());
            config.job = logging.loki.job.clone();
            config.environment = logging.environment.clone();
            Some(config)
        }
        _ => None,
    };

    TelemetryConfig {
        log_level,
        module_levels: Vec::new(),
        loki,
    }
}
