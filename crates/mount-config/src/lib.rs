//! Layered runtime configuration for the mount dispatch binaries.
//!
//! [`Config`] merges built-in defaults, an optional configuration file,
//! `MOUNT_*` environment variables and command-line flags, in that order of
//! precedence, through `ortho_config`.

mod defaults;
mod modes;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use mount_dispatch::SlewCompletion;

pub use self::defaults::*;
pub use self::modes::{LogFormat, ModeParseError, TransportKind};

/// Runtime configuration shared by the mount binaries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "MOUNT")]
pub struct Config {
    /// Command table location.
    #[serde(default = "default_table_path")]
    #[ortho_config(default = default_table_path())]
    table_path: Utf8PathBuf,

    /// Channel used to reach the mount.
    #[serde(default = "default_transport")]
    #[ortho_config(default = default_transport())]
    transport: TransportKind,

    /// Serial device of the mount controller.
    #[serde(default = "default_serial_device")]
    #[ortho_config(default = default_serial_device())]
    serial_device: Utf8PathBuf,

    /// Characters written before every native command.
    #[serde(default = "default_command_prefix")]
    #[ortho_config(default = default_command_prefix())]
    command_prefix: String,

    /// Characters written after every native command.
    #[serde(default = "default_command_terminator")]
    #[ortho_config(default = default_command_terminator())]
    command_terminator: String,

    /// Byte ending every native reply.
    #[serde(default = "default_response_terminator")]
    #[ortho_config(default = default_response_terminator())]
    response_terminator: char,

    /// Directory holding delegated handler programs.
    #[serde(default = "default_handler_dir")]
    #[ortho_config(default = default_handler_dir())]
    handler_dir: Utf8PathBuf,

    /// Deadline for one transport attempt, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    #[ortho_config(default = default_timeout_ms())]
    timeout_ms: u64,

    /// Retries allowed after the first attempt.
    #[serde(default = "default_max_retries")]
    #[ortho_config(default = default_max_retries())]
    max_retries: u32,

    /// Pause before the first retry, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    #[ortho_config(default = default_retry_backoff_ms())]
    retry_backoff_ms: u64,

    /// Upper bound on retry pauses, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    #[ortho_config(default = default_max_backoff_ms())]
    max_backoff_ms: u64,

    /// When a slew counts as finished.
    #[serde(default = "default_slew_completion")]
    #[ortho_config(default = default_slew_completion())]
    slew_completion: SlewCompletion,

    /// `tracing` filter expression.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    log_filter: String,

    /// Log output format.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table_path: default_table_path(),
            transport: default_transport(),
            serial_device: default_serial_device(),
            command_prefix: default_command_prefix(),
            command_terminator: default_command_terminator(),
            response_terminator: default_response_terminator(),
            handler_dir: default_handler_dir(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            slew_completion: default_slew_completion(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Command table location.
    #[must_use]
    pub fn table_path(&self) -> &Utf8Path {
        self.table_path.as_path()
    }

    /// Channel used to reach the mount.
    #[must_use]
    pub const fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Serial device of the mount controller.
    #[must_use]
    pub fn serial_device(&self) -> &Utf8Path {
        self.serial_device.as_path()
    }

    /// Native command prefix.
    #[must_use]
    pub const fn command_prefix(&self) -> &str {
        self.command_prefix.as_str()
    }

    /// Native command terminator.
    #[must_use]
    pub const fn command_terminator(&self) -> &str {
        self.command_terminator.as_str()
    }

    /// Native reply terminator.
    #[must_use]
    pub const fn response_terminator(&self) -> char {
        self.response_terminator
    }

    /// Directory holding delegated handler programs.
    #[must_use]
    pub fn handler_dir(&self) -> &Utf8Path {
        self.handler_dir.as_path()
    }

    /// Deadline for one transport attempt.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Retries allowed after the first attempt.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Pause before the first retry.
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Upper bound on retry pauses.
    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Slew completion mode.
    #[must_use]
    pub const fn slew_completion(&self) -> SlewCompletion {
        self.slew_completion
    }

    /// `tracing` filter expression.
    #[must_use]
    pub const fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
