//! Observability infrastructure: structured logging with consistent spans.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g. `info`, `argent_silver=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for one curation load with standard fields.
///
/// # Example
///
/// ```rust
/// use argent_core::observability::load_span;
///
/// let span = load_span("promote", "sales", "orders", "2025-06-01");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn load_span(operation: &str, domain: &str, entity: &str, load_date: &str) -> Span {
    tracing::info_span!(
        "silver_load",
        op = operation,
        domain = domain,
        entity = entity,
        load_date = load_date,
    )
}
