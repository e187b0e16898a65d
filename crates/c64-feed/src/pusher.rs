//! Pusher channel client over `tokio-tungstenite`.
//!
//! Only speaks the part of protocol 7 a public-channel subscriber needs:
//! connection handshake, subscribe, ping/pong, and channel events.

use std::sync::Arc;
use std::time::Duration;

use c64_core::ChatMessage;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::relay::{FeedClient, FeedConnector, FeedSignal, LinkState, SignalSink};

const PROTOCOL_VERSION: u8 = 7;
const CLIENT_NAME: &str = "c64-relay";
/// Used until the server announces its own `activity_timeout`.
const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);
const PONG_TIMEOUT: Duration = Duration::from_secs(30);

/// The channel event that carries chat messages.
pub const CHAT_EVENT: &str = "chat-message";

#[derive(Clone, Debug)]
pub struct PusherConfig {
    pub key: String,
    pub cluster: String,
    pub channel: String,
}

impl PusherConfig {
    pub fn url(&self) -> String {
        format!(
            "wss://ws-{}.pusher.com/app/{}?protocol={}&client={}&version={}&flash=false",
            self.cluster,
            self.key,
            PROTOCOL_VERSION,
            CLIENT_NAME,
            env!("CARGO_PKG_VERSION"),
        )
    }
}

/// A decoded server frame.
#[derive(Clone, Debug, PartialEq)]
pub enum PusherFrame {
    ConnectionEstablished {
        socket_id: String,
        activity_timeout: Option<Duration>,
    },
    SubscriptionSucceeded {
        channel: String,
    },
    SubscriptionError {
        channel: String,
        detail: Value,
    },
    Ping,
    Pong,
    Error {
        code: Option<i64>,
        message: String,
    },
    Chat(ChatMessage),
    Other {
        event: String,
    },
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Pusher sends `data` as a JSON-encoded string; some publishers send an
/// object instead.
fn decode_data(data: Value) -> Value {
    match data {
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        other => other,
    }
}

pub fn parse_frame(text: &str) -> Result<PusherFrame, FeedError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let data = decode_data(envelope.data);
    let channel = envelope.channel.unwrap_or_default();

    let frame = match envelope.event.as_str() {
        "pusher:connection_established" => PusherFrame::ConnectionEstablished {
            socket_id: data
                .get("socket_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            activity_timeout: data
                .get("activity_timeout")
                .and_then(Value::as_u64)
                .map(Duration::from_secs),
        },
        "pusher_internal:subscription_succeeded" => PusherFrame::SubscriptionSucceeded { channel },
        "pusher:subscription_error" => PusherFrame::SubscriptionError {
            channel,
            detail: data,
        },
        "pusher:ping" => PusherFrame::Ping,
        "pusher:pong" => PusherFrame::Pong,
        "pusher:error" => PusherFrame::Error {
            code: data.get("code").and_then(Value::as_i64),
            message: data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        },
        CHAT_EVENT => PusherFrame::Chat(ChatMessage::from_value(&data)),
        other => PusherFrame::Other {
            event: other.to_string(),
        },
    };
    Ok(frame)
}

fn client_frame(event: &str, data: Value) -> Message {
    Message::Text(json!({ "event": event, "data": data }).to_string().into())
}

/// Opens [`PusherClient`]s for one channel.
pub struct PusherConnector {
    config: Arc<PusherConfig>,
}

impl PusherConnector {
    pub fn new(config: PusherConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl FeedConnector for PusherConnector {
    fn open(&self, sink: SignalSink) -> Result<Box<dyn FeedClient>, FeedError> {
        if self.config.key.is_empty() || self.config.cluster.is_empty() {
            return Err(FeedError::InvalidUrl(self.config.url()));
        }

        let state = Arc::new(Mutex::new(LinkState::Initialized));
        let cancel = CancellationToken::new();
        tokio::spawn(run_link(
            Arc::clone(&self.config),
            sink,
            Arc::clone(&state),
            cancel.clone(),
        ));
        Ok(Box::new(PusherClient { state, cancel }))
    }
}

/// Handle to a running Pusher connection task.
pub struct PusherClient {
    state: Arc<Mutex<LinkState>>,
    cancel: CancellationToken,
}

impl FeedClient for PusherClient {
    fn state(&self) -> LinkState {
        *self.state.lock()
    }

    fn disconnect(&self) {
        self.cancel.cancel();
        *self.state.lock() = LinkState::Disconnected;
    }
}

async fn run_link(
    config: Arc<PusherConfig>,
    sink: SignalSink,
    state: Arc<Mutex<LinkState>>,
    cancel: CancellationToken,
) {
    *state.lock() = LinkState::Connecting;

    let outcome = tokio::select! {
        () = cancel.cancelled() => return,
        outcome = drive(&config, &sink, &state) => outcome,
    };

    match outcome {
        Ok(()) => {
            *state.lock() = LinkState::Disconnected;
            sink.send(FeedSignal::Disconnected);
        }
        Err(error) => {
            *state.lock() = LinkState::Failed;
            sink.send(FeedSignal::Error(error.to_string()));
        }
    }
}

/// Run one connection until the server closes it (`Ok`) or it fails.
async fn drive(
    config: &PusherConfig,
    sink: &SignalSink,
    state: &Mutex<LinkState>,
) -> Result<(), FeedError> {
    let (ws, _) = connect_async(config.url()).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let mut activity_timeout = DEFAULT_ACTIVITY_TIMEOUT;
    let mut awaiting_pong = false;

    loop {
        let wait = if awaiting_pong { PONG_TIMEOUT } else { activity_timeout };
        let message = match tokio::time::timeout(wait, ws_rx.next()).await {
            Err(_) if awaiting_pong => {
                return Err(FeedError::PongTimeout {
                    secs: PONG_TIMEOUT.as_secs(),
                })
            }
            Err(_) => {
                ws_tx.send(client_frame("pusher:ping", json!({}))).await?;
                awaiting_pong = true;
                continue;
            }
            Ok(None) => return Ok(()),
            Ok(Some(message)) => message?,
        };
        // Any traffic proves the link is alive.
        awaiting_pong = false;

        let text = match message {
            Message::Text(text) => text,
            Message::Close(frame) => {
                debug!(frame = ?frame, "pusher closed the socket");
                return Ok(());
            }
            _ => continue,
        };

        let frame = match parse_frame(&text) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(error = %error, "skipping unreadable pusher frame");
                continue;
            }
        };

        match frame {
            PusherFrame::ConnectionEstablished {
                socket_id,
                activity_timeout: announced,
            } => {
                if let Some(timeout) = announced {
                    activity_timeout = timeout;
                }
                *state.lock() = LinkState::Connected;
                debug!(socket_id = %socket_id, "pusher connection established");
                sink.send(FeedSignal::Connected);
                ws_tx
                    .send(client_frame("pusher:subscribe", json!({ "channel": config.channel })))
                    .await?;
            }
            PusherFrame::SubscriptionSucceeded { channel } => {
                info!(channel = %channel, "subscribed to channel");
            }
            PusherFrame::SubscriptionError { channel, detail } => {
                warn!(channel = %channel, detail = %detail, "channel subscription error");
            }
            PusherFrame::Ping => {
                ws_tx.send(client_frame("pusher:pong", json!({}))).await?;
            }
            PusherFrame::Pong => {}
            PusherFrame::Error { code, message } => {
                return Err(FeedError::Protocol { code, message });
            }
            PusherFrame::Chat(message) => sink.send(FeedSignal::Message(message)),
            PusherFrame::Other { event } => debug!(event = %event, "ignoring pusher event"),
        }
    }
}
