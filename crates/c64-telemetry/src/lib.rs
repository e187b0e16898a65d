//! Logging setup for the gateway.
//!
//! Every event goes to stdout as JSON. In production, info+ events are also
//! batched and shipped to Grafana Loki (see [`loki`]).

mod loki;

pub use loki::{build_push_payload, LokiConfig, LokiEntry, LokiHandle, LokiLayer};

use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "c64_feed" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Loki shipping; `None` keeps logs on stdout only.
    pub loki: Option<LokiConfig>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            loki: None,
        }
    }
}

impl TelemetryConfig {
    /// Default filter directive string, e.g. `info,c64_feed=debug`.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Keeps the Loki shipper reachable for a final flush.
pub struct TelemetryGuard {
    loki: Option<LokiHandle>,
}

impl TelemetryGuard {
    /// Whether events are being shipped to Loki.
    pub fn is_shipping(&self) -> bool {
        self.loki.is_some()
    }

    /// Push any buffered log lines. Call before exiting.
    pub async fn shutdown(&self) {
        if let Some(loki) = &self.loki {
            loki.flush().await;
        }
    }
}

/// Initialize the telemetry subsystem. Call once at startup, from inside
/// the tokio runtime when Loki shipping is configured.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_filter(env_filter);

    let (loki_layer, loki_handle) = match config.loki {
        Some(loki) if tokio::runtime::Handle::try_current().is_ok() => {
            let (layer, handle) = LokiLayer::spawn(loki);
            (Some(layer), Some(handle))
        }
        Some(_) => {
            eprintln!("c64-telemetry: no async runtime, Loki shipping disabled");
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(loki_layer)
        .init();

    if loki_handle.is_some() {
        tracing::info!(instance = instance_id(), "shipping logs to loki");
    }

    TelemetryGuard { loki: loki_handle }
}

static INSTANCE_ID: OnceLock<String> = OnceLock::new();

/// Stable per-process identifier: up to 8 characters of the hostname plus
/// 4 random hex digits.
pub fn instance_id() -> &'static str {
    INSTANCE_ID.get_or_init(|| {
        let host = hostname();
        let suffix = uuid::Uuid::now_v7().simple().to_string();
        format!("{}-{}", host.chars().take(8).collect::<String>(), &suffix[suffix.len() - 4..])
    })
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
