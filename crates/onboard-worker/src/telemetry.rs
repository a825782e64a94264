//! Structured logging using tracing.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use crate::WorkerConfig;

/// Initialize structured logging
///
/// `RUST_LOG` takes precedence over the configured filter.
pub fn init_logging(config: &WorkerConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .with_context(|| format!("Invalid log filter: {}", config.log_filter))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.log_json {
        // JSON logs for production
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        tracing::subscriber::set_global_default(registry.with(json_layer))
            .context("Failed to set global default subscriber")?;
    } else {
        // Pretty logs for development
        let fmt_layer = fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        tracing::subscriber::set_global_default(registry.with(fmt_layer))
            .context("Failed to set global default subscriber")?;
    }

    info!(
        log_format = if config.log_json { "json" } else { "pretty" },
        log_filter = %config.log_filter,
        "Logging initialized"
    );

    Ok(())
}

/// Initializes test tracing for unit tests
#[cfg(test)]
pub fn init_test_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_target(false)
        .with_test_writer()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
