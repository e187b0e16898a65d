use std::sync::Arc;

use c64_core::Formatter;
use c64_feed::RelayEvent;
use tokio::sync::broadcast;

use crate::registry::SessionRegistry;

/// Renders relay events and queues them on every connected terminal.
pub struct EventBridge {
    registry: Arc<SessionRegistry>,
    formatter: Arc<dyn Formatter>,
}

impl EventBridge {
    pub fn new(registry: Arc<SessionRegistry>, formatter: Arc<dyn Formatter>) -> Self {
        Self { registry, formatter }
    }

    /// Forward one event. Returns the number of sessions it was queued on.
    pub fn forward(&self, event: &RelayEvent) -> usize {
        let bytes = match event {
            RelayEvent::Message(message) => match self.formatter.chat(message) {
                Some(bytes) => {
                    tracing::info!(chatter = %message.chatter_user_name, "broadcasting message");
                    bytes
                }
                None => return 0,
            },
            RelayEvent::StatusChanged { connected } => self.formatter.link_status(*connected),
            RelayEvent::Reconnecting => self.formatter.reconnecting(),
        };
        self.registry.broadcast(&bytes)
    }

    /// Start the bridge. Spawns a task that reads relay events until the
    /// channel closes.
    pub fn start(self, mut rx: broadcast::Receiver<RelayEvent>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = self.forward(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "event bridge lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("event bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}
