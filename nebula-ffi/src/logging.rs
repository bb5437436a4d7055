//! Process-wide logging for the FFI library
//!
//! Installed once per process; the level is adjustable at run time through
//! the `log_level` operation. NOTICE and FATAL map onto the nearest
//! tracing levels.

use nebula_core::error::{NebulaError, Result};
use std::sync::OnceLock;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Registry;

static RELOAD_HANDLE: OnceLock<reload::Handle<LevelFilter, Registry>> = OnceLock::new();

/// Install the subscriber. Subsequent calls are no-ops, as is a process
/// that already installed its own subscriber.
pub fn init(level: &str) {
    let filter = parse_level(level).unwrap_or(LevelFilter::INFO);
    let (layer, handle) = reload::Layer::new(filter);
    let subscriber = Registry::default()
        .with(layer)
        .with(tracing_subscriber::fmt::layer().with_target(false));
    if subscriber.try_init().is_ok() {
        let _ = RELOAD_HANDLE.set(handle);
    }
}

/// Adjust the log level at run time.
pub fn set_level(level: &str) -> Result<()> {
    let filter = parse_level(level).ok_or_else(|| {
        NebulaError::InvalidArgument(format!("unknown log level '{}'", level))
    })?;
    let Some(handle) = RELOAD_HANDLE.get() else {
        // Logging owned by the host process; nothing to adjust.
        return Ok(());
    };
    handle
        .reload(filter)
        .map_err(|e| NebulaError::Internal(format!("log level reload: {}", e)))
}

fn parse_level(level: &str) -> Option<LevelFilter> {
    match level.to_ascii_uppercase().as_str() {
        "TRACE" => Some(LevelFilter::TRACE),
        "DEBUG" => Some(LevelFilter::DEBUG),
        "INFO" | "NOTICE" => Some(LevelFilter::INFO),
        "WARN" => Some(LevelFilter::WARN),
        "ERROR" | "FATAL" => Some(LevelFilter::ERROR),
        _ => None,
    }
}
