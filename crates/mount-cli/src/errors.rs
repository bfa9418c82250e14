//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use mount_dispatch::{DispatchError, LoadError, TransportError};
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("failed to load command table: {0}")]
    LoadTable(#[from] LoadError),
    #[error("invalid transport settings: {0}")]
    Framing(TransportError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("failed to read session input: {0}")]
    ReadInput(io::Error),
    #[error("failed to write output: {0}")]
    WriteOutput(io::Error),
    #[error("failed to serialise output: {0}")]
    Serialise(#[from] serde_json::Error),
}

impl AppError {
    /// Exit status reported for this error: 1 for caller mistakes, 2 for
    /// infrastructure failures.
    pub(crate) const fn exit_status(&self) -> u8 {
        match self {
            Self::CliUsage(_) => 1,
            Self::Dispatch(error) => error.exit_status(),
            Self::LoadConfiguration(_)
            | Self::Telemetry(_)
            | Self::LoadTable(_)
            | Self::Framing(_)
            | Self::ReadInput(_)
            | Self::WriteOutput(_)
            | Self::Serialise(_) => 2,
        }
    }
}
