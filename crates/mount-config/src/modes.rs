//! Textual enums selecting how the mount is reached and how `mountctl`
//! reports.
//!
//! Every mode reads the same from a configuration file, a `MOUNT_*`
//! variable or a flag: snake case, matched case-insensitively.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Error returned when text names no known mode.
pub type ModeParseError = strum::ParseError;

/// Channel used to reach the mount controller.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TransportKind {
    /// Framed line protocol over a serial device.
    Serial,
    /// External handler programs, one per action.
    #[default]
    Process,
}

/// Shape of the diagnostics written to standard error.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event, fields flattened.
    #[default]
    Json,
    /// Single human-readable line per event.
    Compact,
}
