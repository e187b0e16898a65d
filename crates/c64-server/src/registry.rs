use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::gate::normalize_ip;
use crate::link::TerminalLink;

/// A connected terminal.
pub(crate) struct Session {
    pub(crate) ip: IpAddr,
    pub(crate) open_time: DateTime<Utc>,
    pub(crate) queue: VecDeque<u8>,
    pub(crate) last_idle_notice: Instant,
    /// When the next transmission tick is due. `None` until transmission
    /// starts; the slot goes away with the session.
    pub(crate) next_tick: Option<Instant>,
    pub(crate) link: Box<dyn TerminalLink>,
}

/// Read-only view of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub address: SocketAddr,
    pub ip: IpAddr,
    pub open_time: DateTime<Utc>,
    pub queued: usize,
    pub transmitting: bool,
}

/// Entry in the client listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub address: String,
    pub open_time: DateTime<Utc>,
}

/// All live terminal sessions, keyed by peer address.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SocketAddr, Session>>,
    /// Signalled when a session starts transmitting.
    slot_added: Notify,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a terminal. A session already at the same address is
    /// replaced and its link closed.
    pub fn add(&self, link: Box<dyn TerminalLink>) -> SessionInfo {
        let address = link.peer();
        let session = Session {
            ip: normalize_ip(address.ip()),
            open_time: Utc::now(),
            queue: VecDeque::new(),
            last_idle_notice: Instant::now(),
            next_tick: None,
            link,
        };
        let info = info(address, &session);

        if let Some(old) = self.sessions.lock().insert(address, session) {
            tracing::debug!(address = %address, "replacing existing session");
            old.link.close();
        }
        info
    }

    pub fn get(&self, address: &SocketAddr) -> Option<SessionInfo> {
        self.sessions.lock().get(address).map(|s| info(*address, s))
    }

    /// Drop a session and its tick slot, closing the link. Returns whether
    /// anything was removed.
    pub fn remove(&self, address: &SocketAddr) -> bool {
        match self.sessions.lock().remove(address) {
            Some(session) => {
                session.link.close();
                true
            }
            None => false,
        }
    }

    /// Append bytes to one session's queue. Unknown addresses are ignored.
    pub fn enqueue(&self, address: &SocketAddr, bytes: &[u8]) -> bool {
        match self.sessions.lock().get_mut(address) {
            Some(session) => {
                session.queue.extend(bytes);
                true
            }
            None => false,
        }
    }

    /// Append bytes to every session registered right now. Returns the
    /// number of sessions reached.
    pub fn broadcast(&self, bytes: &[u8]) -> usize {
        let mut sessions = self.sessions.lock();
        for session in sessions.values_mut() {
            session.queue.extend(bytes);
        }
        sessions.len()
    }

    /// Close and forget every session. Returns how many there were.
    pub fn disconnect_all(&self) -> usize {
        let drained: Vec<Session> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.link.close();
        }
        drained.len()
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let mut list: Vec<SessionSummary> = self
            .sessions
            .lock()
            .iter()
            .map(|(address, s)| SessionSummary {
                address: address.to_string(),
                open_time: s.open_time,
            })
            .collect();
        list.sort_by(|a, b| a.open_time.cmp(&b.open_time).then_with(|| a.address.cmp(&b.address)));
        list
    }

    /// Give a session its tick slot, first due at `at`. No-op when the
    /// session is gone or already transmitting.
    pub(crate) fn start_ticks(&self, address: &SocketAddr, at: Instant) -> bool {
        let started = match self.sessions.lock().get_mut(address) {
            Some(session) if session.next_tick.is_none() => {
                session.next_tick = Some(at);
                true
            }
            _ => false,
        };
        if started {
            self.slot_added.notify_one();
        }
        started
    }

    pub(crate) fn slot_added(&self) -> &Notify {
        &self.slot_added
    }

    pub(crate) fn with_sessions<R>(&self, f: impl FnOnce(&mut HashMap<SocketAddr, Session>) -> R) -> R {
        f(&mut self.sessions.lock())
    }
}

fn info(address: SocketAddr, session: &Session) -> SessionInfo {
    SessionInfo {
        address,
        ip: session.ip,
        open_time: session.open_time,
        queued: session.queue.len(),
        transmitting: session.next_tick.is_some(),
    }
}
