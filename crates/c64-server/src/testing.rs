//! Test doubles shared by the unit tests.

use std::net::SocketAddr;
use std::sync::Arc;

use c64_core::{ChatMessage, Formatter};
use c64_feed::{FeedClient, FeedConnector, FeedError, LinkState, SignalSink};
use parking_lot::Mutex;

use crate::error::{Result, ServerError};
use crate::link::TerminalLink;

/// In-memory link that records every byte.
#[derive(Clone)]
pub struct MemoryLink {
    pub peer: SocketAddr,
    pub written: Arc<Mutex<Vec<u8>>>,
    pub closed: Arc<Mutex<bool>>,
    pub fail: Arc<Mutex<bool>>,
}

impl MemoryLink {
    pub fn new(peer: &str) -> Self {
        Self {
            peer: peer.parse().unwrap(),
            written: Arc::default(),
            closed: Arc::default(),
            fail: Arc::default(),
        }
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    pub fn boxed(&self) -> Box<dyn TerminalLink> {
        Box::new(self.clone())
    }
}

impl TerminalLink for MemoryLink {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn send(&self, byte: u8) -> Result<()> {
        if *self.fail.lock() {
            return Err(ServerError::LinkClosed { address: self.peer });
        }
        self.written.lock().push(byte);
        Ok(())
    }

    fn close(&self) {
        *self.closed.lock() = true;
    }
}

/// Formatter with short, recognizable payloads.
pub struct StubFormatter;

impl Formatter for StubFormatter {
    fn chat(&self, message: &ChatMessage) -> Option<Vec<u8>> {
        (!message.text.is_empty()).then(|| message.text.as_bytes().to_vec())
    }

    fn link_status(&self, connected: bool) -> Vec<u8> {
        if connected { b"UP".to_vec() } else { b"DOWN".to_vec() }
    }

    fn reconnecting(&self) -> Vec<u8> {
        b"RETRY".to_vec()
    }

    fn welcome(&self) -> Vec<u8> {
        b"hello".to_vec()
    }

    fn idle_notice(&self) -> Vec<u8> {
        b"ID".to_vec()
    }
}

/// Connector whose clients never get past connecting.
#[derive(Default)]
pub struct CountingConnector {
    opened: Mutex<usize>,
}

impl CountingConnector {
    pub fn opened(&self) -> usize {
        *self.opened.lock()
    }
}

struct IdleClient;

impl FeedClient for IdleClient {
    fn state(&self) -> LinkState {
        LinkState::Connecting
    }

    fn disconnect(&self) {}
}

impl FeedConnector for CountingConnector {
    fn open(&self, _sink: SignalSink) -> std::result::Result<Box<dyn FeedClient>, FeedError> {
        *self.opened.lock() += 1;
        Ok(Box::new(IdleClient))
    }
}
