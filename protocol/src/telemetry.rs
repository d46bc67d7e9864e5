//! # Structured Logging
//!
//! Initializes the `tracing` subscriber with configurable format (JSON or
//! pretty-printed) and environment-based filtering via `RUST_LOG`.
//!
//! All log output is written to stderr.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored output. Suitable for local development.
    Pretty,
    /// Machine-parseable JSON lines. Suitable for production log aggregation.
    Json,
}

/// Initialize the global tracing subscriber.
///
/// Returns `false` if a subscriber was already installed (a second call in
/// the same process, typically from another test), in which case nothing
/// changes.
///
/// # Arguments
///
/// * `default_level` - The default filter when `RUST_LOG` is not set, e.g.
///   `"accrue_contracts=debug,accrue_protocol=info"`.
/// * `format` - Output format (JSON or pretty-printed).
pub fn init_logging(default_level: &str, format: LogFormat) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let installed = match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
            .is_ok(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr).with_target(true))
            .try_init()
            .is_ok(),
    };

    if installed {
        tracing::info!("logging initialized (format={:?})", format);
    }
    installed
}
