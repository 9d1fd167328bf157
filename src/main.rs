use std::sync::Arc;

use anyhow::Result;
use dashstream::{
    arguments,
    channel::{ChannelManager, Handler, MessagePayload},
    config,
    logger::{self, LogTag},
};

/// Main entry point for dashstream
///
/// Constructs the process-wide channel manager once, wires up the demo
/// consumers, connects, and tears everything down on ctrl-c (disconnect
/// cancels any pending reconnect timer).
#[tokio::main]
async fn main() -> Result<()> {
    logger::init();

    let config_path = arguments::get_arg_value("--config")
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());
    config::load_config(&config_path)?;

    if let Some(level) = config::with_config(|cfg| cfg.general.log_level.clone()) {
        logger::info(LogTag::Config, &format!("Log level override: {}", level));
    }

    let channel_config = config::with_config(|cfg| cfg.realtime.to_channel_config());
    logger::info(
        LogTag::System,
        &format!(
            "Starting realtime channel to {} (max {} attempts, {}ms interval)",
            channel_config.url,
            channel_config.max_reconnect_attempts,
            channel_config.reconnect_interval_ms
        ),
    );

    let manager = ChannelManager::new(channel_config);

    // Log every inbound message
    let firehose: Handler = Arc::new(|msg| {
        logger::info(
            LogTag::Channel,
            &format!("Message type='{}' ts={}", msg.kind, msg.timestamp),
        );
    });
    let firehose_sub = manager.subscribe("*", firehose);

    // Typed consumer for metric updates
    let metrics_consumer: Handler = Arc::new(|msg| {
        if let MessagePayload::MetricUpdate(update) = msg.decode() {
            logger::info(
                LogTag::Channel,
                &format!(
                    "Metric {} = {}",
                    update.metric.as_deref().unwrap_or("(unnamed)"),
                    update.value
                ),
            );
        }
    });
    let metrics_sub = manager.subscribe("metric.update", metrics_consumer);

    manager.connect();

    tokio::signal::ctrl_c().await?;
    logger::info(LogTag::System, "Shutting down");

    firehose_sub.unsubscribe();
    metrics_sub.unsubscribe();
    manager.disconnect();

    Ok(())
}
