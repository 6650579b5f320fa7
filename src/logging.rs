//! Logging initialisation for the `hostprep` binary.
//!
//! Logs go to stderr, filtered by `HOSTPREP_LOG` (an `EnvFilter` directive
//! string). Without it only `info` and above are shown.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the log filter.
pub const LOG_ENV_VAR: &str = "HOSTPREP_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Builds the filter from `HOSTPREP_LOG`, falling back to `info` when the
/// variable is unset or unparseable.
#[must_use]
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Installs the global tracing subscriber.
///
/// Later calls are ignored, so tests and the binary can both call it.
pub fn init() {
    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
