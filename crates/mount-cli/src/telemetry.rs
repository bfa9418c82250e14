//! Diagnostics for `mountctl`.
//!
//! Events go to standard error; standard output carries only the JSON
//! result lines.

use std::io::{self, IsTerminal};

use mount_config::{Config, LogFormat};
use once_cell::sync::OnceCell;
use tracing::Subscriber;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};

static INSTALLED: OnceCell<()> = OnceCell::new();

type BoxedSubscriber = Box<dyn Subscriber + Send + Sync>;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter expression does not parse.
    #[error("invalid log filter '{directive}': {message}")]
    InvalidFilter {
        /// Expression as configured.
        directive: String,
        /// Parser diagnostic.
        message: String,
    },
    /// Another global subscriber was installed first.
    #[error("failed to install telemetry subscriber: {0}")]
    Install(SetGlobalDefaultError),
}

/// Installs the global subscriber described by `config`.
///
/// Only the first call installs anything; later calls succeed without
/// touching the global state, so one process may run the CLI repeatedly.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter expression is invalid or a
/// different subscriber is already installed.
pub fn initialise(config: &Config) -> Result<(), TelemetryError> {
    INSTALLED
        .get_or_try_init(|| {
            let ansi = io::stderr().is_terminal();
            let subscriber = subscriber(config.log_filter(), config.log_format(), ansi)?;
            tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Install)
        })
        .map(|_| ())
}

/// Builds a stderr subscriber with UTC RFC 3339 timestamps.
pub(crate) fn subscriber(
    directive: &str,
    format: LogFormat,
    ansi: bool,
) -> Result<BoxedSubscriber, TelemetryError> {
    let filter = EnvFilter::try_new(directive).map_err(|error| TelemetryError::InvalidFilter {
        directive: directive.to_owned(),
        message: error.to_string(),
    })?;
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(ansi)
        .with_target(true)
        .with_timer(UtcTime::rfc_3339());

    Ok(match format {
        LogFormat::Json => Box::new(
            builder
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .finish(),
        ),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    })
}
