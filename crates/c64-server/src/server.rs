use std::sync::Arc;
use std::time::Instant;

use c64_core::Formatter;
use c64_feed::UpstreamRelay;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::api::{self, ApiState};
use crate::error::Result;
use crate::event_bridge::EventBridge;
use crate::gate::{ConnectionGate, GateConfig};
use crate::registry::SessionRegistry;
use crate::scheduler::TransmissionScheduler;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_host: String,
    /// Terminal listener port. 0 picks a free port.
    pub tcp_port: u16,
    /// Admin API port. 0 picks a free port.
    pub api_port: u16,
    pub allowed_ips: Vec<String>,
    pub app_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".into(),
            tcp_port: 10000,
            api_port: 9000,
            allowed_ips: vec!["127.0.0.1".into()],
            app_version: "0000".into(),
        }
    }
}

/// Create and start the gateway. The relay is expected to be started
/// by the caller; its events are subscribed to here.
pub async fn start(
    config: ServerConfig,
    relay: UpstreamRelay,
    formatter: Arc<dyn Formatter>,
) -> Result<ServerHandle> {
    let gate_config = GateConfig::from_allow_list(&config.allowed_ips)?;
    let registry = Arc::new(SessionRegistry::new());

    let scheduler = Arc::new(TransmissionScheduler::new(
        Arc::clone(&registry),
        Arc::clone(&formatter),
    ));
    let scheduler_handle = Arc::clone(&scheduler).spawn();

    let bridge = EventBridge::new(Arc::clone(&registry), Arc::clone(&formatter));
    let bridge_handle = bridge.start(relay.subscribe());

    let gate = Arc::new(ConnectionGate::new(
        gate_config,
        Arc::clone(&registry),
        scheduler,
        relay.clone(),
        formatter,
    ));
    let tcp_listener = TcpListener::bind((config.bind_host.as_str(), config.tcp_port)).await?;
    let tcp_port = tcp_listener.local_addr()?.port();
    let gate_handle = tokio::spawn(gate.serve(tcp_listener));

    let state = ApiState {
        registry: Arc::clone(&registry),
        relay,
        version: config.app_version.clone(),
        start_time: Instant::now(),
    };
    let api_listener = TcpListener::bind((config.bind_host.as_str(), config.api_port)).await?;
    let api_port = api_listener.local_addr()?.port();
    let router = api::router(state);
    let api_handle = tokio::spawn(async move {
        if let Err(error) = axum::serve(api_listener, router).await {
            tracing::error!(error = %error, "admin api stopped");
        }
    });

    tracing::info!(
        tcp_port,
        api_port,
        allowed = config.allowed_ips.len(),
        version = %config.app_version,
        "gateway started"
    );

    Ok(ServerHandle {
        tcp_port,
        api_port,
        registry,
        tasks: vec![scheduler_handle, bridge_handle, gate_handle, api_handle],
    })
}

/// Handle returned by `start()`. Keeps the background tasks alive.
pub struct ServerHandle {
    pub tcp_port: u16,
    pub api_port: u16,
    registry: Arc<SessionRegistry>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Close every terminal and stop the background tasks.
    pub fn shutdown(self) -> usize {
        let closed = self.registry.disconnect_all();
        for task in &self.tasks {
            task.abort();
        }
        tracing::info!(closed, "gateway stopped");
        closed
    }
}
