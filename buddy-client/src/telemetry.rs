//! Tracing bootstrap.

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,buddy_client=debug,buddy_cache=info";

/// Application-level filter variable, consulted after `RUST_LOG`.
pub const LOG_ENV: &str = "BUDDY_LOG";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// `EnvFilter` directives, e.g. `"info,buddy_cache=debug"`.
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global subscriber.
///
/// Filter precedence:
/// 1) `RUST_LOG`
/// 2) `BUDDY_LOG`
/// 3) `log.filter` from the config file
/// 4) internal default filter
///
/// Calling this more than once is harmless; only the first call installs.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::new(select_filter(
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        std::env::var(LOG_ENV).ok(),
        config.filter.clone(),
    ));
    let installed = match config.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_target(true)
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// First candidate that is non-blank and parses as a filter, else the
/// default.
pub fn select_filter(
    rust_log: Option<String>,
    app_log: Option<String>,
    configured: Option<String>,
) -> String {
    [rust_log, app_log, configured]
        .into_iter()
        .flatten()
        .find(|candidate| !candidate.trim().is_empty() && EnvFilter::try_new(candidate).is_ok())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}
