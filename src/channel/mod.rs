/// Realtime channel module
///
/// Implements the client side of the dashboard's push-messaging channel:
/// a single websocket connection with bounded fixed-interval reconnection and
/// typed publish/subscribe fan-out to consumers.
///
/// ## Key components
/// - `manager`: connection lifecycle, reconnect state machine, dispatch
/// - `registry`: type-tag to handler table with set semantics
/// - `message`: wire envelope and typed payload decoding
/// - `metrics`: per-channel counters for monitoring
/// - `error`: internal failure classification
pub mod error;
pub mod manager;
pub mod message;
pub mod metrics;
pub mod registry;

pub use error::ChannelError;
pub use manager::{ChannelConfig, ChannelManager, ConnectionState};
pub use message::{
    AlertRaised, ChannelMessage, MessageKind, MessagePayload, MetricUpdate, SystemStatus, WILDCARD,
};
pub use metrics::{ChannelMetrics, ChannelMetricsSnapshot};
pub use registry::{Handler, Subscription, SubscriptionRegistry};
