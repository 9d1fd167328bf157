pub mod arguments;
pub mod channel;
pub mod config;
pub mod logger;
