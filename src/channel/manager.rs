/// Realtime channel manager - single connection, bounded reconnect, fan-out
///
/// Owns at most one live websocket connection to the push-messaging endpoint
/// and distributes inbound messages to registered consumers:
/// - Connect/disconnect/reconnect lifecycle with idempotent operations
/// - Fixed-interval bounded auto-reconnect on abnormal closure
/// - Exact-type plus wildcard dispatch passes, in registration order
/// - Fire-and-forget send (no queueing while disconnected)
///
/// Nothing here returns an error to the caller; failures are absorbed and
/// surfaced through diagnostics, the connection-state flags and the metrics
/// counters. Every public operation returns immediately; transport I/O and
/// the reconnect delay run on spawned tasks.
use futures_util::{SinkExt, StreamExt};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::arguments::is_debug_channel_enabled;
use crate::channel::error::ChannelError;
use crate::channel::message::{ChannelMessage, WILDCARD};
use crate::channel::metrics::ChannelMetrics;
use crate::channel::registry::{Handler, Subscription, SubscriptionRegistry};
use crate::logger::{self, LogTag};

/// Delay before redialing on a manual reconnect, so the previous transport
/// fully releases its socket first
const RECONNECT_RELEASE_DELAY_MS: u64 = 100;

// ============================================================================
// CONFIG AND STATE
// ============================================================================

/// Channel manager configuration (endpoint plus reconnection policy)
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Websocket endpoint URL (ws:// or wss://)
    pub url: String,

    /// Consecutive abnormal closures tolerated before giving up
    pub max_reconnect_attempts: u32,

    /// Fixed delay between automatic reconnection attempts (not exponential)
    pub reconnect_interval_ms: u64,
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Commands for the writer half of the active connection
enum Outbound {
    Frame(String),
    Close,
}

// ============================================================================
// CHANNEL MANAGER
// ============================================================================

/// Handle to the process-wide realtime channel
///
/// Construct once at application start, clone freely, and call `disconnect`
/// on shutdown to cancel any pending reconnect timer.
#[derive(Clone)]
pub struct ChannelManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ChannelConfig,
    state_tx: watch::Sender<ConnectionState>,
    reconnect_attempts: AtomicU32,
    intentional_close: AtomicBool,
    /// Bumped by connect/disconnect so a superseded connection task never
    /// mutates state or schedules reconnects after the fact
    generation: AtomicU64,
    registry: Arc<SubscriptionRegistry>,
    metrics: Arc<ChannelMetrics>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelManager {
    pub fn new(config: ChannelConfig) -> Self {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(Inner {
                config,
                state_tx,
                reconnect_attempts: AtomicU32::new(0),
                intentional_close: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                registry: SubscriptionRegistry::new(),
                metrics: ChannelMetrics::new(),
                outbound: Mutex::new(None),
                reconnect_task: Mutex::new(None),
            }),
        }
    }

    /// Initiate a connection if none is active
    ///
    /// Idempotent: does nothing while connecting or connected. Returns
    /// immediately; the handshake runs on a spawned task.
    pub fn connect(&self) {
        self.inner.spawn_connect();
    }

    /// Close the active connection with the reserved normal-closure code
    ///
    /// Cancels any pending scheduled reconnect; no automatic reconnection
    /// follows. Idempotent.
    pub fn disconnect(&self) {
        self.inner.begin_disconnect();
    }

    /// Force a fresh connection cycle
    ///
    /// Disconnects, resets the reconnect counter, then redials after a short
    /// fixed delay. This is the manual recovery path once automatic attempts
    /// are exhausted.
    pub fn reconnect(&self) {
        logger::log(LogTag::Channel, "RECONNECT", "Manual reconnect requested");

        self.inner.begin_disconnect();
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(RECONNECT_RELEASE_DELAY_MS)).await;
            inner.spawn_connect();
        });

        let mut pending = self
            .inner
            .reconnect_task
            .lock()
            .expect("reconnect task lock poisoned");
        if let Some(old) = pending.replace(handle) {
            old.abort();
        }
    }

    /// Register a handler under a type tag (or the wildcard "*")
    ///
    /// Duplicate registration of the same handler value under one type is a
    /// no-op. The returned handle removes exactly this (type, handler) pair;
    /// its release is idempotent and also runs on drop.
    pub fn subscribe(&self, kind: &str, handler: Handler) -> Subscription {
        let added = self.inner.registry.subscribe(kind, handler.clone());
        if is_debug_channel_enabled() {
            logger::debug(
                LogTag::Channel,
                &format!(
                    "Subscribe '{}' ({})",
                    kind,
                    if added { "registered" } else { "duplicate, no-op" }
                ),
            );
        }
        Subscription::new(&self.inner.registry, kind.to_string(), handler)
    }

    /// Remove a (type, handler) pair; silent no-op when absent
    pub fn unsubscribe(&self, kind: &str, handler: &Handler) {
        self.inner.registry.unsubscribe(kind, handler);
    }

    /// Transmit a message if connected; otherwise drop it with a diagnostic
    ///
    /// Fire-and-forget: no buffering while disconnected, no confirmation,
    /// never an error to the caller.
    pub fn send(&self, message: ChannelMessage) {
        if message.kind == WILDCARD {
            self.inner.metrics.send_dropped();
            logger::warning(
                LogTag::Channel,
                "Dropping outbound message: '*' is a subscription key, not a message type",
            );
            return;
        }

        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                self.inner.metrics.send_dropped();
                logger::warning(
                    LogTag::Channel,
                    &format!("Dropping outbound message: {}", ChannelError::Serialization(e)),
                );
                return;
            }
        };

        let outbound = self.inner.outbound.lock().expect("outbound lock poisoned");
        match outbound.as_ref() {
            Some(tx) if self.state() == ConnectionState::Connected => {
                if tx.send(Outbound::Frame(text)).is_err() {
                    self.inner.metrics.send_dropped();
                    logger::warning(
                        LogTag::Channel,
                        &format!("Dropping outbound '{}': connection closing", message.kind),
                    );
                }
            }
            _ => {
                self.inner.metrics.send_dropped();
                logger::warning(
                    LogTag::Channel,
                    &format!("Dropping outbound '{}': not connected", message.kind),
                );
            }
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state() == ConnectionState::Connecting
    }

    /// Consecutive abnormal closures since the last successful connection
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Watch connection-state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn metrics(&self) -> Arc<ChannelMetrics> {
        Arc::clone(&self.inner.metrics)
    }
}

// ============================================================================
// CONNECTION LIFECYCLE
// ============================================================================

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state && is_debug_channel_enabled() {
            logger::debug(
                LogTag::Channel,
                &format!("State {} -> {}", previous, state),
            );
        }
    }

    /// Start the handshake task if currently disconnected
    fn spawn_connect(self: &Arc<Self>) {
        let started = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });

        if !started {
            if is_debug_channel_enabled() {
                logger::debug(LogTag::Channel, "connect() ignored: already active");
            }
            return;
        }

        self.intentional_close.store(false, Ordering::SeqCst);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.run_connection(generation).await;
        });
    }

    /// Dial, then run the reader/writer loop until closure
    async fn run_connection(self: Arc<Self>, generation: u64) {
        if is_debug_channel_enabled() {
            logger::debug(
                LogTag::Channel,
                &format!("Connecting to {}", self.config.url),
            );
        }

        let stream = match connect_async(self.config.url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                let err = ChannelError::Handshake {
                    url: self.config.url.clone(),
                    source: e,
                };
                self.metrics.connect_failure();
                logger::error(LogTag::Channel, &err.to_string());

                if self.is_current(generation) {
                    self.set_state(ConnectionState::Disconnected);
                    self.schedule_reconnect();
                }
                return;
            }
        };

        if !self.is_current(generation) {
            // disconnect() raced the handshake; release the fresh transport
            return;
        }

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        *self.outbound.lock().expect("outbound lock poisoned") = Some(outbound_tx);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        self.metrics.connection_opened();
        logger::log(
            LogTag::Channel,
            "CONNECT",
            &format!("Connected to {}", self.config.url),
        );

        let (mut ws_tx, mut ws_rx) = stream.split();
        let mut intentional = false;

        loop {
            tokio::select! {
                biased;

                command = outbound_rx.recv() => match command {
                    Some(Outbound::Frame(text)) => {
                        if let Err(e) = ws_tx.send(WsMessage::Text(text)).await {
                            logger::warning(
                                LogTag::Channel,
                                &ChannelError::Transport(e).to_string(),
                            );
                            break;
                        }
                        self.metrics.message_sent();
                    }
                    Some(Outbound::Close) | None => {
                        // reserved code 1000 marks the intentional disconnect
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client disconnect".into(),
                        };
                        let _ = ws_tx.send(WsMessage::Close(Some(frame))).await;
                        intentional = true;
                        break;
                    }
                },

                frame = ws_rx.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        self.dispatch_frame(&text);
                    }
                    Some(Ok(WsMessage::Close(close))) => {
                        // only the normal-closure code suppresses reconnection
                        intentional =
                            matches!(&close, Some(f) if f.code == CloseCode::Normal);
                        if is_debug_channel_enabled() {
                            logger::debug(
                                LogTag::Channel,
                                &format!("Close frame received: {:?}", close),
                            );
                        }
                        break;
                    }
                    Some(Ok(_)) => {
                        // binary/ping/pong frames carry no channel messages
                    }
                    Some(Err(e)) => {
                        logger::warning(
                            LogTag::Channel,
                            &ChannelError::Transport(e).to_string(),
                        );
                        break;
                    }
                    None => break,
                },
            }
        }

        if !self.is_current(generation) {
            // disconnect() superseded this connection and owned the teardown
            return;
        }

        *self.outbound.lock().expect("outbound lock poisoned") = None;
        self.set_state(ConnectionState::Disconnected);
        self.metrics.connection_closed();

        if intentional || self.intentional_close.load(Ordering::SeqCst) {
            logger::log(LogTag::Channel, "CLOSE", "Connection closed");
        } else {
            logger::log(LogTag::Channel, "CLOSE", "Connection lost");
            self.schedule_reconnect();
        }
    }

    /// Shared disconnect path: cancel pending reconnect, close the transport
    fn begin_disconnect(&self) {
        self.intentional_close.store(true, Ordering::SeqCst);

        if let Some(pending) = self
            .reconnect_task
            .lock()
            .expect("reconnect task lock poisoned")
            .take()
        {
            pending.abort();
        }

        // Supersede the running connection task; teardown happens here
        self.generation.fetch_add(1, Ordering::SeqCst);

        let had_connection = {
            let mut outbound = self.outbound.lock().expect("outbound lock poisoned");
            match outbound.take() {
                Some(tx) => {
                    let _ = tx.send(Outbound::Close);
                    true
                }
                None => false,
            }
        };

        let was_active = self.state_tx.send_if_modified(|state| {
            if *state != ConnectionState::Disconnected {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });

        if had_connection {
            self.metrics.connection_closed();
        }
        if had_connection || was_active {
            logger::log(LogTag::Channel, "DISCONNECT", "Intentional disconnect");
        }
    }

    /// Schedule one reconnection attempt after the fixed interval
    ///
    /// Counts the attempt against the configured maximum; at the cap the
    /// channel stays disconnected until connect() or reconnect() is called.
    fn schedule_reconnect(self: &Arc<Self>) {
        if self.intentional_close.load(Ordering::SeqCst) {
            return;
        }

        let attempts = self.reconnect_attempts.load(Ordering::SeqCst);
        let max = self.config.max_reconnect_attempts;
        if attempts >= max {
            logger::warning(
                LogTag::Channel,
                &format!(
                    "Reconnect attempts exhausted ({}/{}); waiting for manual reconnect",
                    attempts, max
                ),
            );
            return;
        }

        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.reconnect_scheduled();
        logger::log(
            LogTag::Channel,
            "RECONNECT",
            &format!(
                "Attempt {}/{} in {}ms",
                attempt, max, self.config.reconnect_interval_ms
            ),
        );

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(inner.config.reconnect_interval_ms)).await;
            inner.spawn_connect();
        });

        let mut pending = self
            .reconnect_task
            .lock()
            .expect("reconnect task lock poisoned");
        if let Some(old) = pending.replace(handle) {
            old.abort();
        }
    }

    // ========================================================================
    // INBOUND DISPATCH
    // ========================================================================

    /// Parse one inbound text frame and fan it out to handlers
    ///
    /// Runs the exact-type pass then the wildcard pass; both always run, so a
    /// handler registered under both is invoked twice. Each handler is
    /// isolated: a panic is caught, counted and logged without stopping
    /// sibling handlers or the connection.
    fn dispatch_frame(&self, text: &str) {
        self.metrics.message_received();

        let message = match ChannelMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                self.metrics.parse_failure();
                logger::warning(LogTag::Channel, &format!("Dropping malformed frame: {}", e));
                return;
            }
        };

        if is_debug_channel_enabled() {
            logger::debug(
                LogTag::Channel,
                &format!("Frame received: type='{}'", message.kind),
            );
        }

        for handler in self.registry.handlers_for(&message.kind) {
            self.invoke_handler(&handler, &message);
        }
        for handler in self.registry.handlers_for(WILDCARD) {
            self.invoke_handler(&handler, &message);
        }
    }

    fn invoke_handler(&self, handler: &Handler, message: &ChannelMessage) {
        self.metrics.handler_invoked();
        if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
            self.metrics.handler_panic();
            logger::error(
                LogTag::Channel,
                &format!("Handler panicked for type '{}'; continuing", message.kind),
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;

    fn test_config(url: &str, max_attempts: u32, interval_ms: u64) -> ChannelConfig {
        ChannelConfig {
            url: url.to_string(),
            max_reconnect_attempts: max_attempts,
            reconnect_interval_ms: interval_ms,
        }
    }

    fn frame(kind: &str, payload: serde_json::Value) -> String {
        ChannelMessage {
            kind: kind.to_string(),
            payload,
            timestamp: 1_700_000_000_000,
        }
        .to_json()
        .unwrap()
    }

    async fn wait_for<F: Fn() -> bool>(cond: F, timeout_ms: u64) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        while tokio::time::Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cond()
    }

    /// Server that accepts connections and echoes text frames back
    async fn spawn_echo_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let accepts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepts);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                        while let Some(Ok(msg)) = ws.next().await {
                            if msg.is_text() {
                                if ws.send(msg).await.is_err() {
                                    break;
                                }
                            } else if msg.is_close() {
                                break;
                            }
                        }
                    }
                });
            }
        });

        (url, accepts)
    }

    /// Server that completes the handshake then drops the socket without a
    /// close frame (abnormal closure from the client's perspective)
    async fn spawn_drop_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let accepts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepts);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let _ = tokio_tungstenite::accept_async(stream).await;
                });
            }
        });

        (url, accepts)
    }

    /// URL pointing at a port with no listener (handshake always refused)
    async fn refused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);
        url
    }

    #[tokio::test]
    async fn test_connect_and_intentional_disconnect() {
        let (url, accepts) = spawn_echo_server().await;
        let manager = ChannelManager::new(test_config(&url, 5, 50));

        manager.connect();
        assert!(wait_for(|| manager.is_connected(), 2000).await);
        assert_eq!(accepts.load(Ordering::SeqCst), 1);
        assert_eq!(manager.reconnect_attempts(), 0);

        manager.disconnect();
        assert!(
            wait_for(
                || manager.state() == ConnectionState::Disconnected,
                2000
            )
            .await
        );

        // No scheduled reconnection fires, even past the configured interval
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(accepts.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        let snapshot = manager.metrics().snapshot();
        assert_eq!(snapshot.connections_opened, 1);
        assert_eq!(snapshot.connections_closed, 1);
        assert_eq!(snapshot.reconnects_scheduled, 0);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (url, accepts) = spawn_echo_server().await;
        let manager = ChannelManager::new(test_config(&url, 5, 50));

        manager.connect();
        assert!(wait_for(|| manager.is_connected(), 2000).await);
        manager.connect();
        manager.connect();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(accepts.load(Ordering::SeqCst), 1);
        assert_eq!(manager.metrics().snapshot().connections_opened, 1);

        manager.disconnect();
    }

    #[tokio::test]
    async fn test_send_and_receive_round_trip() {
        let (url, _accepts) = spawn_echo_server().await;
        let manager = ChannelManager::new(test_config(&url, 5, 50));

        let order = Arc::new(Mutex::new(Vec::new()));

        let exact_order = Arc::clone(&order);
        let exact: Handler = Arc::new(move |msg| {
            exact_order
                .lock()
                .unwrap()
                .push(format!("exact:{}", msg.kind));
        });
        let wild_order = Arc::clone(&order);
        let wild: Handler = Arc::new(move |msg| {
            wild_order
                .lock()
                .unwrap()
                .push(format!("wild:{}", msg.kind));
        });

        let _exact_sub = manager.subscribe("metric.update", exact);
        let _wild_sub = manager.subscribe(WILDCARD, wild);

        manager.connect();
        assert!(wait_for(|| manager.is_connected(), 2000).await);

        manager.send(ChannelMessage::new("metric.update", json!({"value": 42})));

        assert!(wait_for(|| order.lock().unwrap().len() == 2, 2000).await);
        assert_eq!(
            *order.lock().unwrap(),
            vec![
                "exact:metric.update".to_string(),
                "wild:metric.update".to_string()
            ]
        );

        manager.disconnect();
    }

    #[tokio::test]
    async fn test_auto_reconnect_after_abnormal_closure() {
        let (url, accepts) = spawn_drop_server().await;
        let manager = ChannelManager::new(test_config(&url, 2, 50));

        manager.connect();

        // Each successful handshake resets the counter, so the client keeps
        // cycling: connect, server drops, one attempt is scheduled, repeat.
        assert!(wait_for(|| accepts.load(Ordering::SeqCst) >= 3, 3000).await);
        assert!(manager.reconnect_attempts() <= 2);

        manager.disconnect();
    }

    #[tokio::test]
    async fn test_bounded_reconnect_attempts() {
        let url = refused_url().await;
        let manager = ChannelManager::new(test_config(&url, 3, 50));

        manager.connect();
        tokio::time::sleep(Duration::from_millis(700)).await;

        // Initial failure plus exactly three scheduled attempts, then nothing
        let snapshot = manager.metrics().snapshot();
        assert_eq!(manager.reconnect_attempts(), 3);
        assert_eq!(snapshot.reconnects_scheduled, 3);
        assert_eq!(snapshot.connect_failures, 4);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        // Explicit connect() is a single fresh attempt; at the cap it fails
        // without scheduling more
        manager.connect();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let snapshot = manager.metrics().snapshot();
        assert_eq!(snapshot.connect_failures, 5);
        assert_eq!(snapshot.reconnects_scheduled, 3);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_manual_reconnect_resets_counter() {
        let url = refused_url().await;
        let manager = ChannelManager::new(test_config(&url, 2, 50));

        manager.connect();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(manager.reconnect_attempts(), 2);

        manager.reconnect();
        // Counter drops to zero immediately; the redial happens after the
        // release delay and failures start accumulating again
        assert!(wait_for(|| manager.reconnect_attempts() < 2, 500).await);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(manager.reconnect_attempts(), 2);

        manager.disconnect();
    }

    #[tokio::test]
    async fn test_disconnect_cancels_scheduled_reconnect() {
        let url = refused_url().await;
        let manager = ChannelManager::new(test_config(&url, 5, 300));

        manager.connect();
        assert!(
            wait_for(
                || manager.metrics().snapshot().reconnects_scheduled == 1,
                1000
            )
            .await
        );

        manager.disconnect();

        // Wait well past the reconnect interval: the pending attempt was
        // cancelled, so no further handshake is tried
        tokio::time::sleep(Duration::from_millis(700)).await;
        let snapshot = manager.metrics().snapshot();
        assert_eq!(snapshot.connect_failures, 1);
        assert_eq!(snapshot.reconnects_scheduled, 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_send_while_disconnected_is_a_pure_noop() {
        let manager = ChannelManager::new(test_config("ws://127.0.0.1:1", 3, 1000));

        let handler: Handler = Arc::new(|_msg| {});
        let subscription = manager.subscribe("alert", handler);

        manager.send(ChannelMessage::new("alert", json!({"severity": "low"})));
        manager.send(ChannelMessage::new(WILDCARD, json!({})));

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.inner.registry.handler_count(), 1);
        assert_eq!(manager.metrics().snapshot().sends_dropped, 2);
        assert_eq!(manager.metrics().snapshot().messages_sent, 0);

        subscription.unsubscribe();
    }

    #[test]
    fn test_dispatch_exact_then_wildcard_in_registration_order() {
        let manager = ChannelManager::new(test_config("ws://127.0.0.1:1", 3, 1000));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut subs = Vec::new();
        for name in ["exact-1", "exact-2"] {
            let order = Arc::clone(&order);
            let handler: Handler = Arc::new(move |_msg| {
                order.lock().unwrap().push(name.to_string());
            });
            subs.push(manager.subscribe("metric.update", handler));
        }
        let wild_order = Arc::clone(&order);
        let wild: Handler = Arc::new(move |_msg| {
            wild_order.lock().unwrap().push("wild".to_string());
        });
        subs.push(manager.subscribe(WILDCARD, wild));

        manager
            .inner
            .dispatch_frame(&frame("metric.update", json!({"value": 1})));

        assert_eq!(
            *order.lock().unwrap(),
            vec!["exact-1".to_string(), "exact-2".to_string(), "wild".to_string()]
        );
    }

    #[test]
    fn test_handler_registered_under_both_runs_twice() {
        let manager = ChannelManager::new(test_config("ws://127.0.0.1:1", 3, 1000));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let handler: Handler = Arc::new(move |_msg| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let _exact = manager.subscribe("alert", handler.clone());
        let _wild = manager.subscribe(WILDCARD, handler);

        manager
            .inner
            .dispatch_frame(&frame("alert", json!({"severity": "high"})));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handler_panic_does_not_stop_siblings() {
        let manager = ChannelManager::new(test_config("ws://127.0.0.1:1", 3, 1000));
        let calls = Arc::new(AtomicUsize::new(0));

        let panicking: Handler = Arc::new(|_msg| panic!("handler failure"));
        let counter = Arc::clone(&calls);
        let surviving: Handler = Arc::new(move |_msg| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let wild_counter = Arc::clone(&calls);
        let wild: Handler = Arc::new(move |_msg| {
            wild_counter.fetch_add(1, Ordering::SeqCst);
        });

        let _first = manager.subscribe("alert", panicking);
        let _second = manager.subscribe("alert", surviving);
        let _third = manager.subscribe(WILDCARD, wild);

        manager
            .inner
            .dispatch_frame(&frame("alert", json!({"severity": "high"})));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let snapshot = manager.metrics().snapshot();
        assert_eq!(snapshot.handler_panics, 1);
        assert_eq!(snapshot.handlers_invoked, 3);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let manager = ChannelManager::new(test_config("ws://127.0.0.1:1", 3, 1000));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let handler: Handler = Arc::new(move |_msg| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let _sub = manager.subscribe(WILDCARD, handler);

        manager.inner.dispatch_frame("{ not valid json");
        manager.inner.dispatch_frame(r#"{"type": "x"}"#);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let snapshot = manager.metrics().snapshot();
        assert_eq!(snapshot.parse_failures, 2);
        assert_eq!(snapshot.messages_received, 2);
    }

    #[test]
    fn test_unsubscribed_handler_receives_nothing() {
        let manager = ChannelManager::new(test_config("ws://127.0.0.1:1", 3, 1000));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let handler: Handler = Arc::new(move |_msg| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let subscription = manager.subscribe("alert", handler);
        subscription.unsubscribe();

        manager
            .inner
            .dispatch_frame(&frame("alert", json!({"severity": "high"})));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.inner.registry.handler_count(), 0);
    }
}
