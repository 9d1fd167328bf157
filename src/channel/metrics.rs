/// Channel-level counters for monitoring
///
/// Lock-free atomic counters shared behind Arc. Everything the rest of the
/// application can observe about the channel beyond the connection-state
/// flags lives here.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ChannelMetrics {
    messages_received: AtomicU64,
    parse_failures: AtomicU64,
    handlers_invoked: AtomicU64,
    handler_panics: AtomicU64,
    messages_sent: AtomicU64,
    sends_dropped: AtomicU64,
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    connect_failures: AtomicU64,
    reconnects_scheduled: AtomicU64,
}

impl ChannelMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_invoked(&self) {
        self.handlers_invoked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_dropped(&self) {
        self.sends_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_scheduled(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChannelMetricsSnapshot {
        ChannelMetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            handlers_invoked: self.handlers_invoked.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            sends_dropped: self.sends_dropped.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMetricsSnapshot {
    pub messages_received: u64,
    pub parse_failures: u64,
    pub handlers_invoked: u64,
    pub handler_panics: u64,
    pub messages_sent: u64,
    pub sends_dropped: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub connect_failures: u64,
    pub reconnects_scheduled: u64,
}
