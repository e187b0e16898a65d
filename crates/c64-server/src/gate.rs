use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use c64_core::Formatter;
use c64_feed::UpstreamRelay;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError};
use crate::link::SocketLink;
use crate::registry::SessionRegistry;
use crate::scheduler::TransmissionScheduler;

const WELCOME_DELAY: Duration = Duration::from_millis(500);

/// Unwrap IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`).
pub fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}

#[derive(Clone, Debug)]
pub struct GateConfig {
    /// Normalized addresses allowed to open a session.
    pub allowed_ips: Vec<IpAddr>,
    pub welcome_delay: Duration,
}

impl GateConfig {
    /// Build from textual allow-list entries. Entries are compared as parsed
    /// addresses rather than strings, so `::ffff:10.0.0.1` and `10.0.0.1`
    /// are the same entry, and an entry that is not an IP fails startup
    /// instead of silently never matching.
    pub fn from_allow_list<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let allowed_ips = entries
            .iter()
            .map(|entry| {
                let entry = entry.as_ref().trim();
                entry
                    .parse::<IpAddr>()
                    .map(normalize_ip)
                    .map_err(|_| ServerError::InvalidAllowEntry(entry.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            allowed_ips,
            welcome_delay: WELCOME_DELAY,
        })
    }
}

/// Admits terminal connections and runs them until they close.
pub struct ConnectionGate {
    config: GateConfig,
    registry: Arc<SessionRegistry>,
    scheduler: Arc<TransmissionScheduler>,
    relay: UpstreamRelay,
    formatter: Arc<dyn Formatter>,
}

impl ConnectionGate {
    pub fn new(
        config: GateConfig,
        registry: Arc<SessionRegistry>,
        scheduler: Arc<TransmissionScheduler>,
        relay: UpstreamRelay,
        formatter: Arc<dyn Formatter>,
    ) -> Self {
        Self {
            config,
            registry,
            scheduler,
            relay,
            formatter,
        }
    }

    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        self.config.allowed_ips.contains(&normalize_ip(ip))
    }

    /// Accept connections until the task is dropped.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tokio::spawn(Arc::clone(&self).handle(stream, peer));
                }
                Err(error) => {
                    warn!(error = %error, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Run one terminal connection to completion.
    pub async fn handle(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        info!(address = %peer, "terminal connected");

        if !self.is_allowed(peer.ip()) {
            warn!(address = %peer, "ip not allowed, closing connection");
            return;
        }
        if let Err(error) = stream.set_nodelay(true) {
            debug!(address = %peer, error = %error, "could not set TCP_NODELAY");
        }

        let (mut reader, writer) = stream.into_split();
        let cancel = CancellationToken::new();
        let _ = self
            .registry
            .add(Box::new(SocketLink::spawn(peer, writer, cancel.clone())));

        if !self.relay.is_connected() && !self.relay.is_connecting() {
            self.relay.connect();
        }

        let registry = Arc::clone(&self.registry);
        let welcome = self.formatter.welcome();
        let delay = self.config.welcome_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.enqueue(&peer, &welcome);
        });

        let _ = self.scheduler.start(&peer);

        // Terminals only listen; whatever they send is dropped.
        let mut buf = [0u8; 256];
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    // Whoever closed the link already removed the session.
                    debug!(address = %peer, "terminal link closed");
                    return;
                }
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        info!(address = %peer, "terminal disconnected");
                        break;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!(address = %peer, error = %error, "terminal socket error");
                        break;
                    }
                },
            }
        }
        let _ = self.registry.remove(&peer);
    }
}
