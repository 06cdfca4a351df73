//! Logging setup and span helpers.
//!
//! Every engine entry point runs inside a span carrying the operation name and
//! the table URI, so a single commit or change-feed read can be followed end to
//! end in the logs.

use std::fmt;
use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{
    fmt as layer_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, for log shippers.
    Json,
    /// Multi-line human-readable output.
    #[default]
    Pretty,
}

/// Installs a global `tracing` subscriber once per process.
///
/// Later calls do nothing. Levels come from `RUST_LOG` (for example
/// `tidal_delta=debug`) and default to `info`.
///
/// # Example
///
/// ```rust
/// use tidal_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // try_init: an embedding application may already own the global subscriber.
        let _ = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(layer_fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(layer_fmt::layer().pretty())
                .try_init(),
        };
    });
}

/// Creates a span for a table operation.
///
/// ```rust
/// use tidal_core::observability::table_span;
///
/// let span = table_span("commit", "s3://bucket/events");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn table_span(operation: &str, uri: &str) -> Span {
    tracing::info_span!("table", op = operation, table = uri)
}

/// Wrapper that hides a secret value in `Debug` and `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Redacted<T>(pub T);

impl<T> Redacted<T> {
    /// Returns the wrapped value.
    #[must_use]
    pub fn expose(&self) -> &T {
        &self.0
    }

    /// Unwraps into the inner value.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json); // no-op
    }

    #[test]
    fn test_table_span_creates_span() {
        let span = table_span("open", "memory://events");
        let _guard = span.enter();
        tracing::info!("message in table span");
    }

    #[test]
    fn test_redacted_hides_value() {
        let secret = Redacted("hunter2".to_string());
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(secret.to_string(), "[REDACTED]");
        assert_eq!(secret.expose(), "hunter2");
    }
}
