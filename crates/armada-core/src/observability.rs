//! Observability infrastructure for armada.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers and span constructors so every component logs the
//! same way.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

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
/// Call once at application startup. Safe to call multiple times; subsequent
/// calls are no-ops, which keeps tests hermetic.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `armada_cluster=debug`)
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

/// Creates a span for engine reconcile rounds.
#[must_use]
pub fn engine_span(operation: &str, machine: &str) -> Span {
    tracing::info_span!("engine", op = operation, machine = machine)
}

/// Creates a span for agent operations.
#[must_use]
pub fn agent_span(operation: &str, machine: &str) -> Span {
    tracing::info_span!("agent", op = operation, machine = machine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty);
    }

    #[test]
    fn span_helpers_create_spans() {
        let span = engine_span("reconcile", "machine-1");
        let _guard = span.enter();
        tracing::info!("test message in span");
    }
}
