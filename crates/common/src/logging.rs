//! Logging utilities for the vrrpd crates.

use std::io::IsTerminal;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize tracing with sensible defaults.
///
/// Uses the RUST_LOG environment variable to control log levels,
/// falling back to `default_level` (e.g. "info"). Colors are only used
/// when stdout is a terminal, so a daemon's log file stays plain text.
pub fn init(default_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(std::io::stdout().is_terminal()))
        .with(filter(default_level))
        .init();
}

/// Initialize tracing with JSON formatting (useful for structured logging).
pub fn init_json(default_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(filter(default_level))
        .init();
}
