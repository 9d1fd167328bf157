/// Logger configuration and per-module debug gating
///
/// The configuration is a process-wide singleton initialized once from the
/// command-line arguments. Tests may replace it wholesale with
/// `set_logger_config`.
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::RwLock;

use super::levels::LogLevel;
use super::tags::LogTag;
use crate::arguments;

/// Runtime logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Minimum level threshold (messages above are suppressed)
    pub min_level: LogLevel,

    /// Tags with --debug-<module> enabled
    pub debug_tags: HashSet<String>,

    /// Global --verbose flag
    pub verbose: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
            verbose: false,
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> =
    Lazy::new(|| RwLock::new(LoggerConfig::default()));

/// Initialize logger configuration from command-line arguments
///
/// Scans for --debug-<module> flags, --verbose and --log-level <level>.
pub fn init_from_args() {
    let args = arguments::get_cmd_args();

    let mut config = LoggerConfig::default();

    for arg in &args {
        if let Some(module) = arg.strip_prefix("--debug-") {
            config.debug_tags.insert(module.to_string());
        }
    }

    if arguments::is_verbose_enabled() {
        config.verbose = true;
        config.min_level = LogLevel::Verbose;
    } else if !config.debug_tags.is_empty() {
        config.min_level = LogLevel::Debug;
    }

    if let Some(level) = arguments::get_arg_value("--log-level") {
        if let Some(parsed) = LogLevel::from_str(&level) {
            config.min_level = parsed;
        }
    }

    set_logger_config(config);
}

/// Get a copy of the current logger configuration
pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG
        .read()
        .map(|cfg| cfg.clone())
        .unwrap_or_default()
}

/// Replace the logger configuration (used by init and tests)
pub fn set_logger_config(config: LoggerConfig) {
    if let Ok(mut current) = LOGGER_CONFIG.write() {
        *current = config;
    }
}

/// Check whether --debug-<module> is enabled for a tag
pub fn is_debug_enabled_for_tag(tag: &LogTag) -> bool {
    let config = get_logger_config();
    config.verbose || config.debug_tags.contains(&tag.to_debug_key())
}
