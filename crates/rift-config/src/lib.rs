//! Configuration for the Rift session layer.
//!
//! Runtime-configurable settings persisted as RON, with CLI overrides via
//! clap. CLI values always win over the file; the file always wins over
//! the built-in defaults.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, NetworkConfig, default_config_dir};
pub use error::ConfigError;
