/// Internal error classification for the realtime channel
///
/// Public channel operations never return these to callers; failures are
/// absorbed and surfaced through diagnostics, connection-state flags and
/// metrics. The taxonomy exists so the internals log and count failures
/// consistently.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Transport construction or websocket handshake failed
    #[error("Handshake failed for {url}: {source}")]
    Handshake {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// Established connection failed mid-stream
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Outbound message could not be serialized
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
