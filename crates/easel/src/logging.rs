#![forbid(unsafe_code)]

//! Process-wide `tracing` subscriber setup.
//!
//! Library code only emits events and spans; installing a subscriber is left
//! to the host. [`init_tracing`] and [`init_from_config`] are the conveniences
//! the host can call once at startup.
//!
//! Filter precedence: the explicit directive (or `[logging] filter`), then
//! [`LOG_ENV`], then [`DEFAULT_FILTER`].

use tracing_subscriber::EnvFilter;

use crate::config::EditorConfig;

/// Environment variable consulted when no explicit filter is given.
pub const LOG_ENV: &str = "EASEL_LOG";

/// Filter used when neither an explicit directive nor [`LOG_ENV`] is set.
pub const DEFAULT_FILTER: &str = "info";

/// Resolve the filter: explicit directive, then [`LOG_ENV`], then
/// [`DEFAULT_FILTER`]. An unparsable explicit directive falls through.
#[must_use]
pub fn resolve_filter(filter: Option<&str>) -> EnvFilter {
    filter
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .or_else(|| EnvFilter::try_from_env(LOG_ENV).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a fmt subscriber for the whole process.
///
/// Returns `false` when a global subscriber was already installed; the
/// existing one stays in place.
pub fn init_tracing(filter: Option<&str>) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(resolve_filter(filter))
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Install a fmt subscriber using the `[logging] filter` of `config`.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_from_config(config: &EditorConfig) -> bool {
    init_tracing(config.logging.filter.as_deref())
}
