//! rtdlink Common Library
//!
//! Shared types and utilities for the rtdlink telemetry bridge:
//!
//! - [`telemetry`] - Data model (`Reading`, `Sample`, `Batch`) and record rendering
//! - [`serialization`] - CSV/JSON/CBOR encoding of batches
//! - [`config`] - Configuration loading (JSON5 format) and logging settings
//! - [`session`] - Process run identity used for artifact naming
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod serialization;
pub mod session;
pub mod telemetry;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use serialization::{Format, encode};
pub use session::Session;
pub use telemetry::{Batch, Reading, Sample, channel_name, column_names};
pub use tracing_appender::non_blocking::WorkerGuard;

/// Initialize tracing with the given configuration.
///
/// Console output uses `LogFormat::Text` or `LogFormat::Json`. When
/// `config.directory` is set, events are also written (plain text, no ANSI)
/// to `<directory>/<session>_log.txt`. The returned guard flushes that file
/// on drop and must be held for the lifetime of the process.
///
/// # Example
///
/// ```ignore
/// use rtdlink_common::{LoggingConfig, Session, init_tracing};
///
/// let session = Session::start();
/// let _guard = init_tracing(&LoggingConfig::default(), &session)?;
/// ```
pub fn init_tracing(config: &LoggingConfig, session: &Session) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    match config.format {
        LogFormat::Text => layers.push(fmt::layer().boxed()),
        LogFormat::Json => layers.push(fmt::layer().json().boxed()),
    }

    let guard = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)?;
            let appender =
                tracing_appender::rolling::never(directory, session.artifact_name("log.txt"));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;

    tracing::debug!(
        level = %config.level,
        session = %session.id(),
        directory = ?config.directory,
        "Logging initialized"
    );

    Ok(guard)
}
