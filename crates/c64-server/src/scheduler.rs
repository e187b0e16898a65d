use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use c64_core::Formatter;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::registry::SessionRegistry;

/// One byte per session per tick, the terminal's native speed.
pub const TICK_PERIOD: Duration = Duration::from_millis(100);

/// An idle session gets a status notice after this long.
pub const IDLE_THRESHOLD: Duration = Duration::from_secs(120);

/// Drains session queues at a fixed rate.
///
/// Every session owns one due-instant slot. [`tick_due`](Self::tick_due)
/// services every slot that is due and returns the earliest upcoming one;
/// a single driver task sleeps until then.
pub struct TransmissionScheduler {
    registry: Arc<SessionRegistry>,
    formatter: Arc<dyn Formatter>,
}

impl TransmissionScheduler {
    pub fn new(registry: Arc<SessionRegistry>, formatter: Arc<dyn Formatter>) -> Self {
        Self { registry, formatter }
    }

    /// Start transmitting to a session. The first tick is due immediately.
    pub fn start(&self, address: &SocketAddr) -> bool {
        self.registry.start_ticks(address, Instant::now())
    }

    /// Run every tick due at `now`. Returns when the next one is due.
    pub fn tick_due(&self, now: Instant) -> Option<Instant> {
        self.registry.with_sessions(|sessions| {
            let mut failed = Vec::new();

            for (address, session) in sessions.iter_mut() {
                match session.next_tick {
                    Some(due) if due <= now => {}
                    _ => continue,
                }

                if let Some(byte) = session.queue.pop_front() {
                    if let Err(error) = session.link.send(byte) {
                        tracing::warn!(address = %address, error = %error, "write failed, dropping session");
                        failed.push(*address);
                        continue;
                    }
                } else if now.duration_since(session.last_idle_notice) > IDLE_THRESHOLD {
                    session.last_idle_notice = now;
                    session.queue.extend(self.formatter.idle_notice());
                }

                session.next_tick = Some(now + TICK_PERIOD);
            }

            for address in failed {
                if let Some(session) = sessions.remove(&address) {
                    session.link.close();
                }
            }

            sessions.values().filter_map(|s| s.next_tick).min()
        })
    }

    /// Spawn the driver task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.tick_due(Instant::now()) {
                    Some(due) => {
                        tokio::select! {
                            () = tokio::time::sleep_until(due) => {}
                            () = self.registry.slot_added().notified() => {}
                        }
                    }
                    None => self.registry.slot_added().notified().await,
                }
            }
        })
    }
}
