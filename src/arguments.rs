/// Centralized argument handling for dashstream
///
/// Consolidates command-line argument parsing and debug flag checking so that
/// every module gates its diagnostics the same way.
///
/// Features:
/// - Centralized CMD_ARGS storage with thread-safe access
/// - Debug flag checking functions for all modules
/// - Unified argument parsing utilities
use once_cell::sync::Lazy;
use std::env;
use std::sync::Mutex;

/// Global command-line arguments storage
/// Thread-safe singleton that stores arguments for access throughout the application
pub static CMD_ARGS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(env::args().collect()));

/// Sets the global command-line arguments
/// Used by tests to override the default env::args() collection
pub fn set_cmd_args(args: Vec<String>) {
    if let Ok(mut cmd_args) = CMD_ARGS.lock() {
        *cmd_args = args;
    }
}

/// Gets a copy of the current command-line arguments
/// Returns a vector clone to avoid holding the mutex lock
pub fn get_cmd_args() -> Vec<String> {
    match CMD_ARGS.lock() {
        Ok(args) => args.clone(),
        Err(_) => {
            // Fallback to env::args if mutex is poisoned
            env::args().collect()
        }
    }
}

/// Checks if a specific argument is present in the command line
pub fn has_arg(arg: &str) -> bool {
    get_cmd_args().iter().any(|a| a == arg)
}

/// Gets the value of a command-line argument that follows a flag
/// Returns None if the flag is not found or has no value
pub fn get_arg_value(flag: &str) -> Option<String> {
    let args = get_cmd_args();
    for (i, arg) in args.iter().enumerate() {
        if arg == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

// =============================================================================
// DEBUG FLAG CHECKING FUNCTIONS
// These functions check for specific debug flags in the command-line arguments
// =============================================================================

/// Channel manager debug mode (connection lifecycle, dispatch, reconnects)
pub fn is_debug_channel_enabled() -> bool {
    has_arg("--debug-channel")
}

/// Config loading debug mode
pub fn is_debug_config_enabled() -> bool {
    has_arg("--debug-config")
}

/// Global verbose mode
pub fn is_verbose_enabled() -> bool {
    has_arg("--verbose")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_lookup() {
        set_cmd_args(vec![
            "dashstream".to_string(),
            "--debug-channel".to_string(),
            "--config".to_string(),
            "custom.json".to_string(),
        ]);

        assert!(has_arg("--debug-channel"));
        assert!(!has_arg("--debug-config"));
        assert_eq!(get_arg_value("--config"), Some("custom.json".to_string()));
        assert_eq!(get_arg_value("--missing"), None);
    }
}
