use camino::Utf8PathBuf;
use mount_dispatch::SlewCompletion;

use crate::modes::{LogFormat, TransportKind};

/// Default location of the command table.
pub const DEFAULT_TABLE_PATH: &str = "config/bisque.yaml";

/// Default directory holding delegated handler programs.
pub const DEFAULT_HANDLER_DIR: &str = "resources/bisque";

/// Default serial device of the mount controller.
pub const DEFAULT_SERIAL_DEVICE: &str = "/dev/ttyUSB0";

/// Default command prefix of the native line protocol.
pub const DEFAULT_COMMAND_PREFIX: &str = ":";

/// Default command terminator of the native line protocol.
pub const DEFAULT_COMMAND_TERMINATOR: &str = "#";

/// Default response terminator of the native line protocol.
pub const DEFAULT_RESPONSE_TERMINATOR: char = '#';

/// Default per-attempt deadline in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default pause before the first retry in milliseconds.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;

/// Default upper bound on retry pauses in milliseconds.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 4_000;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default command table path.
#[must_use]
pub fn default_table_path() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_TABLE_PATH)
}

/// Default handler directory.
#[must_use]
pub fn default_handler_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_HANDLER_DIR)
}

/// Default serial device.
#[must_use]
pub fn default_serial_device() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_SERIAL_DEVICE)
}

/// Default transport.
#[must_use]
pub const fn default_transport() -> TransportKind {
    TransportKind::Process
}

/// Owned command prefix used where allocation is required (e.g. serde).
#[must_use]
pub fn default_command_prefix() -> String {
    String::from(DEFAULT_COMMAND_PREFIX)
}

/// Owned command terminator used where allocation is required.
#[must_use]
pub fn default_command_terminator() -> String {
    String::from(DEFAULT_COMMAND_TERMINATOR)
}

/// Default response terminator.
#[must_use]
pub const fn default_response_terminator() -> char {
    DEFAULT_RESPONSE_TERMINATOR
}

/// Default per-attempt deadline.
#[must_use]
pub const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Default retry count.
#[must_use]
pub const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Default initial backoff.
#[must_use]
pub const fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

/// Default backoff cap.
#[must_use]
pub const fn default_max_backoff_ms() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}

/// Default slew completion mode.
#[must_use]
pub const fn default_slew_completion() -> SlewCompletion {
    SlewCompletion::ByFlag
}

/// Default log filter expression used by the binaries.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}
