//! Structured logging system for dashstream
//!
//! Provides a clean, ergonomic logging API with:
//! - Automatic debug mode filtering from command-line arguments
//! - Standard log levels (Error/Warning/Info/Debug/Verbose)
//! - Per-module debug control via --debug-<module> flags
//! - Colored console output
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dashstream::logger::{self, LogTag};
//!
//! logger::error(LogTag::Channel, "Connection failed");
//! logger::info(LogTag::System, "Channel manager started");
//! logger::debug(LogTag::Channel, "Frame details: ..."); // Only if --debug-channel
//! ```
//!
//! ## Initialization
//!
//! Call once at startup, before any logging occurs:
//! ```rust,ignore
//! logger::init();
//! ```

mod config;
mod core;
mod format;
mod levels;
mod tags;

// Re-export public types
pub use config::{get_logger_config, is_debug_enabled_for_tag, set_logger_config, LoggerConfig};
pub use levels::LogLevel;
pub use tags::LogTag;

/// Initialize the logger system
///
/// Scans command-line arguments for --debug-<module> flags, --verbose and
/// --log-level, and configures filtering rules accordingly.
pub fn init() {
    config::init_from_args();
}

/// Log at ERROR level (always shown, critical issues)
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level (important issues that need attention)
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level (standard operational messages)
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level (requires --debug-<module> for the tag)
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level (requires --verbose)
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}

/// Legacy-style logging with an explicit type string
///
/// Used where the call site wants a custom type column (e.g. "CONNECT",
/// "RECONNECT") instead of a plain level name. Filtered at INFO level.
pub fn log(tag: LogTag, log_type: &str, message: &str) {
    if core::should_log(&tag, LogLevel::Info) {
        format::format_and_log(tag, log_type, message);
    }
}
