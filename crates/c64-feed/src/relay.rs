use std::sync::Arc;
use std::time::Duration;

use c64_core::ChatMessage;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::FeedError;

/// Events published to the rest of the gateway.
#[derive(Clone, Debug, PartialEq)]
pub enum RelayEvent {
    /// The feed link came up or went down.
    StatusChanged { connected: bool },
    /// A reconnect attempt has been scheduled.
    Reconnecting,
    /// A chat message arrived on the channel.
    Message(ChatMessage),
}

/// What the relay believes about the upstream link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    Disconnected,
    Connecting,
    Connected,
}

/// What the feed client itself reports about its socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Initialized,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

/// Lifecycle and data signals raised by a feed client.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedSignal {
    Connected,
    Disconnected,
    Error(String),
    Message(ChatMessage),
}

/// Where a feed client sends its signals. Each sink is stamped with the
/// generation of the client it was handed to.
#[derive(Clone, Debug)]
pub struct SignalSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, FeedSignal)>,
}

impl SignalSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, FeedSignal)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn send(&self, signal: FeedSignal) {
        let _ = self.tx.send((self.generation, signal));
    }
}

/// A live feed client.
pub trait FeedClient: Send {
    fn state(&self) -> LinkState;
    fn disconnect(&self);
}

/// Opens feed clients. Opening is synchronous; the connection itself runs
/// in the background and reports through the sink.
pub trait FeedConnector: Send + Sync {
    fn open(&self, sink: SignalSink) -> Result<Box<dyn FeedClient>, FeedError>;
}

#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Channel name, reported in status.
    pub channel: String,
    pub reconnect_delay: Duration,
    pub health_interval: Duration,
}

impl RelayConfig {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            reconnect_delay: Duration::from_secs(5),
            health_interval: Duration::from_secs(30),
        }
    }
}

/// Snapshot returned by the status endpoints.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    pub connected: bool,
    pub connecting: bool,
    pub last_activity: Option<DateTime<Utc>>,
    /// Milliseconds since `last_activity`.
    pub time_since_last_activity: Option<i64>,
    pub message_count: u64,
    pub channel: String,
}

struct LinkSlot {
    state: RelayState,
    last_activity: Option<DateTime<Utc>>,
    message_count: u64,
    generation: u64,
    client: Option<Box<dyn FeedClient>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

struct Shared {
    connector: Arc<dyn FeedConnector>,
    config: RelayConfig,
    events: broadcast::Sender<RelayEvent>,
    signals: mpsc::UnboundedSender<(u64, FeedSignal)>,
    pending_signals: Mutex<Option<mpsc::UnboundedReceiver<(u64, FeedSignal)>>>,
    link: Mutex<LinkSlot>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Keeps one upstream feed connection alive.
///
/// - `connect()` is a no-op while connecting or connected
/// - link loss schedules at most one reconnect, `reconnect_delay` later
/// - every `health_interval` the belief is reconciled with the client's
///   own link state, and a dead link is reconnected
/// - signals from a client that has been replaced are ignored
#[derive(Clone)]
pub struct UpstreamRelay {
    shared: Arc<Shared>,
}

impl UpstreamRelay {
    pub fn new(
        connector: Arc<dyn FeedConnector>,
        events: broadcast::Sender<RelayEvent>,
        config: RelayConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                events,
                signals: tx,
                pending_signals: Mutex::new(Some(rx)),
                link: Mutex::new(LinkSlot {
                    state: RelayState::Disconnected,
                    last_activity: None,
                    message_count: 0,
                    generation: 0,
                    client: None,
                    reconnect_timer: None,
                }),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start the signal pump and the health check, then connect.
    pub fn start(&self) {
        let mut tasks = self.shared.tasks.lock();

        if let Some(mut rx) = self.shared.pending_signals.lock().take() {
            let relay = self.clone();
            tasks.push(tokio::spawn(async move {
                while let Some((generation, signal)) = rx.recv().await {
                    relay.handle_signal(generation, signal);
                }
            }));
        }

        let relay = self.clone();
        let period = self.shared.config.health_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                let _ = ticker.tick().await;
                relay.health_check();
            }
        }));
        drop(tasks);

        self.connect();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.shared.events.subscribe()
    }

    pub fn connect(&self) {
        let mut link = self.shared.link.lock();
        self.connect_locked(&mut link);
    }

    /// Tear down the client and cancel any pending reconnect.
    pub fn disconnect(&self) {
        let mut link = self.shared.link.lock();
        if let Some(timer) = link.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(client) = link.client.take() {
            client.disconnect();
        }
        link.generation += 1;
        link.state = RelayState::Disconnected;
        info!("feed disconnected");
    }

    /// `disconnect()` plus stopping the health check and signal pump.
    pub fn shutdown(&self) {
        self.disconnect();
        for task in self.shared.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Connect now, unless already connected or connecting.
    pub fn force_reconnect(&self) -> bool {
        let mut link = self.shared.link.lock();
        if link.state != RelayState::Disconnected {
            return false;
        }
        info!("forced feed reconnect");
        self.connect_locked(&mut link);
        true
    }

    pub fn state(&self) -> RelayState {
        self.shared.link.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == RelayState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state() == RelayState::Connecting
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.shared.link.lock().last_activity
    }

    pub fn message_count(&self) -> u64 {
        self.shared.link.lock().message_count
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.shared.link.lock().reconnect_timer.is_some()
    }

    pub fn channel(&self) -> &str {
        &self.shared.config.channel
    }

    pub fn status(&self) -> RelayStatus {
        let link = self.shared.link.lock();
        RelayStatus {
            connected: link.state == RelayState::Connected,
            connecting: link.state == RelayState::Connecting,
            last_activity: link.last_activity,
            time_since_last_activity: link
                .last_activity
                .map(|at| (Utc::now() - at).num_milliseconds()),
            message_count: link.message_count,
            channel: self.shared.config.channel.clone(),
        }
    }

    /// Apply a signal from the client of `generation`.
    pub(crate) fn handle_signal(&self, generation: u64, signal: FeedSignal) {
        let mut link = self.shared.link.lock();
        if generation != link.generation {
            debug!(generation, current = link.generation, "ignoring signal from stale client");
            return;
        }

        match signal {
            FeedSignal::Connected => {
                link.state = RelayState::Connected;
                link.last_activity = Some(Utc::now());
                info!(channel = %self.shared.config.channel, "feed connected");
                self.emit(RelayEvent::StatusChanged { connected: true });
            }
            FeedSignal::Disconnected => {
                warn!("feed disconnected by remote");
                self.link_lost(&mut link);
            }
            FeedSignal::Error(error) => {
                warn!(error = %error, "feed connection error");
                self.link_lost(&mut link);
            }
            FeedSignal::Message(message) => {
                link.last_activity = Some(Utc::now());
                link.message_count += 1;
                debug!(chatter = %message.chatter_user_name, "chat message received");
                self.emit(RelayEvent::Message(message));
            }
        }
    }

    /// Reconcile belief with the client's actual state.
    pub(crate) fn health_check(&self) {
        let mut link = self.shared.link.lock();
        let actual = link
            .client
            .as_ref()
            .map_or(LinkState::Disconnected, |client| client.state());

        if actual == LinkState::Connected && link.state != RelayState::Connected {
            info!("feed link is up, correcting state");
            link.state = RelayState::Connected;
        } else if !matches!(actual, LinkState::Connected | LinkState::Connecting)
            && link.state == RelayState::Connected
        {
            warn!(actual = ?actual, "feed link is down, correcting state");
            link.state = RelayState::Disconnected;
        }

        if link.state == RelayState::Disconnected {
            info!("feed not connected, attempting reconnection");
            self.connect_locked(&mut link);
        }
    }

    fn connect_locked(&self, link: &mut LinkSlot) {
        if link.state != RelayState::Disconnected {
            return;
        }
        if let Some(timer) = link.reconnect_timer.take() {
            timer.abort();
        }

        link.state = RelayState::Connecting;
        if let Some(old) = link.client.take() {
            old.disconnect();
        }
        link.generation += 1;
        info!(channel = %self.shared.config.channel, generation = link.generation, "connecting to feed");

        let sink = SignalSink::new(link.generation, self.shared.signals.clone());
        match self.shared.connector.open(sink) {
            Ok(client) => link.client = Some(client),
            Err(error) => {
                warn!(error = %error, "failed to open feed connection");
                self.link_lost(link);
            }
        }
    }

    fn link_lost(&self, link: &mut LinkSlot) {
        let was_connected = link.state == RelayState::Connected;
        link.state = RelayState::Disconnected;
        if was_connected {
            self.emit(RelayEvent::StatusChanged { connected: false });
        }
        self.schedule_reconnect(link);
    }

    fn schedule_reconnect(&self, link: &mut LinkSlot) {
        if link.reconnect_timer.is_some() {
            return;
        }

        let delay = self.shared.config.reconnect_delay;
        info!(delay_secs = delay.as_secs(), "scheduling feed reconnect");
        self.emit(RelayEvent::Reconnecting);

        let relay = self.clone();
        link.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut link = relay.shared.link.lock();
            link.reconnect_timer = None;
            relay.connect_locked(&mut link);
        }));
    }

    fn emit(&self, event: RelayEvent) {
        // No receivers is fine.
        let _ = self.shared.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeConnector {
        sinks: Mutex<Vec<SignalSink>>,
        links: Mutex<Vec<Arc<Mutex<LinkState>>>>,
        fail: Mutex<bool>,
    }

    impl FakeConnector {
        fn opened(&self) -> usize {
            self.sinks.lock().len()
        }

        fn last_sink(&self) -> SignalSink {
            self.sinks.lock().last().cloned().unwrap()
        }

        fn set_last_link(&self, state: LinkState) {
            *self.links.lock().last().unwrap().lock() = state;
        }
    }

    struct FakeClient {
        state: Arc<Mutex<LinkState>>,
    }

    impl FeedClient for FakeClient {
        fn state(&self) -> LinkState {
            *self.state.lock()
        }

        fn disconnect(&self) {
            *self.state.lock() = LinkState::Disconnected;
        }
    }

    impl FeedConnector for FakeConnector {
        fn open(&self, sink: SignalSink) -> Result<Box<dyn FeedClient>, FeedError> {
            self.sinks.lock().push(sink);
            if *self.fail.lock() {
                return Err(FeedError::InvalidUrl("nope".into()));
            }
            let state = Arc::new(Mutex::new(LinkState::Connecting));
            self.links.lock().push(Arc::clone(&state));
            Ok(Box::new(FakeClient { state }))
        }
    }

    fn relay() -> (UpstreamRelay, Arc<FakeConnector>, broadcast::Receiver<RelayEvent>) {
        let connector = Arc::new(FakeConnector::default());
        let (tx, rx) = broadcast::channel(64);
        let relay = UpstreamRelay::new(connector.clone(), tx, RelayConfig::new("chan"));
        (relay, connector, rx)
    }

    fn drain(rx: &mut broadcast::Receiver<RelayEvent>) -> Vec<RelayEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn signal(relay: &UpstreamRelay, connector: &FakeConnector, signal: FeedSignal) {
        relay.handle_signal(connector.last_sink().generation(), signal);
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (relay, connector, _rx) = relay();
        relay.connect();
        relay.connect();
        assert_eq!(connector.opened(), 1);
        assert!(relay.is_connecting());

        signal(&relay, &connector, FeedSignal::Connected);
        relay.connect();
        assert_eq!(connector.opened(), 1);
        assert!(relay.is_connected());
    }

    #[tokio::test]
    async fn connected_always_notifies() {
        let (relay, connector, mut rx) = relay();
        relay.connect();
        signal(&relay, &connector, FeedSignal::Connected);
        assert!(relay.last_activity().is_some());
        assert_eq!(drain(&mut rx), vec![RelayEvent::StatusChanged { connected: true }]);
    }

    #[tokio::test]
    async fn disconnect_after_connected_notifies_then_schedules() {
        let (relay, connector, mut rx) = relay();
        relay.connect();
        signal(&relay, &connector, FeedSignal::Connected);
        drain(&mut rx);

        signal(&relay, &connector, FeedSignal::Disconnected);
        assert_eq!(relay.state(), RelayState::Disconnected);
        assert!(relay.has_pending_reconnect());
        assert_eq!(
            drain(&mut rx),
            vec![RelayEvent::StatusChanged { connected: false }, RelayEvent::Reconnecting]
        );
    }

    #[tokio::test]
    async fn error_while_connecting_does_not_notify_status() {
        let (relay, connector, mut rx) = relay();
        relay.connect();
        signal(&relay, &connector, FeedSignal::Error("refused".into()));
        assert_eq!(drain(&mut rx), vec![RelayEvent::Reconnecting]);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_is_single_flight() {
        let (relay, connector, mut rx) = relay();
        relay.connect();
        let sink = connector.last_sink();

        relay.handle_signal(sink.generation(), FeedSignal::Error("a".into()));
        relay.handle_signal(sink.generation(), FeedSignal::Disconnected);
        relay.handle_signal(sink.generation(), FeedSignal::Error("b".into()));
        assert_eq!(drain(&mut rx), vec![RelayEvent::Reconnecting]);
        assert_eq!(connector.opened(), 1);

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(connector.opened(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(connector.opened(), 2);
        assert!(relay.is_connecting());
        assert!(!relay.has_pending_reconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_is_treated_as_disconnect() {
        let (relay, connector, mut rx) = relay();
        *connector.fail.lock() = true;
        relay.connect();
        assert_eq!(relay.state(), RelayState::Disconnected);
        assert!(relay.has_pending_reconnect());
        assert_eq!(drain(&mut rx), vec![RelayEvent::Reconnecting]);

        *connector.fail.lock() = false;
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(connector.opened(), 2);
        assert!(relay.is_connecting());
    }

    #[tokio::test]
    async fn messages_count_and_forward() {
        let (relay, connector, mut rx) = relay();
        relay.connect();
        signal(&relay, &connector, FeedSignal::Connected);
        drain(&mut rx);

        let message = ChatMessage {
            chatter_user_name: "RetroFan".into(),
            text: "hi".into(),
            ..Default::default()
        };
        signal(&relay, &connector, FeedSignal::Message(message.clone()));
        signal(&relay, &connector, FeedSignal::Message(message.clone()));
        assert_eq!(relay.message_count(), 2);
        assert_eq!(
            drain(&mut rx),
            vec![RelayEvent::Message(message.clone()), RelayEvent::Message(message)]
        );
    }

    #[tokio::test]
    async fn stale_generation_is_ignored() {
        let (relay, connector, mut rx) = relay();
        relay.connect();
        let old = connector.last_sink();
        relay.disconnect();
        relay.connect();
        assert_eq!(connector.opened(), 2);

        relay.handle_signal(old.generation(), FeedSignal::Connected);
        relay.handle_signal(old.generation(), FeedSignal::Error("late".into()));
        assert!(relay.is_connecting());
        assert!(!relay.has_pending_reconnect());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn force_reconnect_rejected_while_active() {
        let (relay, connector, _rx) = relay();
        relay.connect();
        assert!(!relay.force_reconnect());
        assert!(relay.is_connecting());
        signal(&relay, &connector, FeedSignal::Connected);
        assert!(!relay.force_reconnect());
        assert!(relay.is_connected());
        assert_eq!(connector.opened(), 1);

        relay.disconnect();
        assert!(relay.force_reconnect());
        assert_eq!(connector.opened(), 2);
    }

    #[tokio::test]
    async fn connect_cancels_pending_reconnect() {
        let (relay, connector, _rx) = relay();
        relay.connect();
        signal(&relay, &connector, FeedSignal::Disconnected);
        assert!(relay.has_pending_reconnect());

        assert!(relay.force_reconnect());
        assert!(!relay.has_pending_reconnect());
    }

    #[tokio::test]
    async fn disconnect_cancels_timer_and_closes_client() {
        let (relay, connector, _rx) = relay();
        relay.connect();
        signal(&relay, &connector, FeedSignal::Connected);
        connector.set_last_link(LinkState::Connected);
        signal(&relay, &connector, FeedSignal::Disconnected);
        assert!(relay.has_pending_reconnect());

        relay.disconnect();
        assert!(!relay.has_pending_reconnect());
        assert_eq!(relay.state(), RelayState::Disconnected);
        assert_eq!(*connector.links.lock()[0].lock(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn health_check_promotes_when_link_is_up() {
        let (relay, connector, mut rx) = relay();
        relay.connect();
        connector.set_last_link(LinkState::Connected);

        relay.health_check();
        assert!(relay.is_connected());
        assert_eq!(connector.opened(), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn health_check_demotes_and_reconnects_dead_link() {
        let (relay, connector, mut rx) = relay();
        relay.connect();
        signal(&relay, &connector, FeedSignal::Connected);
        drain(&mut rx);
        connector.set_last_link(LinkState::Failed);

        relay.health_check();
        assert_eq!(connector.opened(), 2);
        assert!(relay.is_connecting());
        // Log only, no status notice.
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn health_check_leaves_connecting_link_alone() {
        let (relay, connector, _rx) = relay();
        relay.connect();
        relay.health_check();
        assert_eq!(connector.opened(), 1);
        assert!(relay.is_connecting());
    }

    #[tokio::test(start_paused = true)]
    async fn start_runs_pump_and_health_check() {
        let (relay, connector, mut rx) = relay();
        relay.start();
        assert_eq!(connector.opened(), 1);

        connector.last_sink().send(FeedSignal::Connected);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(relay.is_connected());
        assert_eq!(drain(&mut rx), vec![RelayEvent::StatusChanged { connected: true }]);

        connector.set_last_link(LinkState::Disconnected);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.opened(), 2);

        relay.shutdown();
        assert_eq!(relay.state(), RelayState::Disconnected);
    }

    #[tokio::test]
    async fn status_snapshot() {
        let (relay, connector, _rx) = relay();
        let status = relay.status();
        assert!(!status.connected && !status.connecting);
        assert!(status.time_since_last_activity.is_none());
        assert_eq!(status.channel, "chan");

        relay.connect();
        signal(&relay, &connector, FeedSignal::Connected);
        let status = relay.status();
        assert!(status.connected);
        assert!(status.time_since_last_activity.is_some_and(|ms| ms >= 0));

        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("timeSinceLastActivity").is_some());
        assert!(json.get("messageCount").is_some());
    }
}
