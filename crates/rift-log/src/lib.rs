//! Structured logging for the Rift session layer.
//!
//! Span-based, filterable logging via the `tracing` ecosystem: console
//! output with uptime timestamps and module paths, plus JSON file logging
//! in debug builds for post-mortem analysis. The filter respects
//! `RUST_LOG`, then the config file's `debug.log_level`, then the
//! built-in default.

use std::path::Path;

use rift_config::Config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// The filter used when neither `RUST_LOG` nor the config specifies one.
const DEFAULT_FILTER: &str = "info";

/// Initializes the global tracing subscriber.
///
/// * `log_dir` — optional directory for JSON log files (debug builds only)
/// * `debug_build` — enables the JSON file layer
/// * `config` — optional configuration whose `debug.log_level` overrides
///   the default filter (but not `RUST_LOG`)
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    // Debug builds also log structured JSON to a file for post-mortems.
    if debug_build
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join("rift.log"))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}

/// The filter directive that would apply for `config`, before any
/// `RUST_LOG` override.
pub fn filter_directive(config: Option<&Config>) -> String {
    match config {
        Some(config) if !config.debug.log_level.is_empty() => config.debug.log_level.clone(),
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// An `EnvFilter` built from the default directive, for tests and tools
/// that set up their own subscriber.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}
