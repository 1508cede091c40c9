// Kbswitch Config API
// Read-only TOML configuration

pub mod parser;

pub use parser::{Config, ConfigError};
