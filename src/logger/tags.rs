/// Log tags identify which subsystem produced a message
///
/// Each tag maps to a --debug-<module> command-line flag so diagnostics can be
/// enabled per subsystem without flooding the console.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    Channel,
    Config,
    System,
}

impl LogTag {
    /// Display name used in the console prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            LogTag::Channel => "CHANNEL",
            LogTag::Config => "CONFIG",
            LogTag::System => "SYSTEM",
        }
    }

    /// Key used for --debug-<key> flag matching
    pub fn to_debug_key(&self) -> String {
        self.as_str().to_lowercase()
    }

    /// Plain (uncolored) representation for machine-readable output
    pub fn to_plain_string(&self) -> String {
        self.as_str().to_string()
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
