//! # c64-feed
//!
//! Upstream chat feed for the gateway.
//!
//! - [`relay`]: the [`UpstreamRelay`] state machine. It keeps one feed
//!   client alive with single-flight reconnects and a periodic health check,
//!   and publishes [`RelayEvent`]s on a broadcast channel.
//! - [`pusher`]: the Pusher WebSocket client behind [`FeedConnector`].

#![deny(unsafe_code)]

pub mod error;
pub mod pusher;
pub mod relay;

pub use error::FeedError;
pub use pusher::{PusherConfig, PusherConnector};
pub use relay::{
    FeedClient, FeedConnector, FeedSignal, LinkState, RelayConfig, RelayEvent, RelayState,
    RelayStatus, SignalSink, UpstreamRelay,
};
