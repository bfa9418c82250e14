//! Configuration loading helpers for `mountctl`.
//!
//! Configuration flags lead the command line. They are split off and handed
//! to `ortho_config`; everything from the first other token onwards is
//! parsed by `clap`.

use std::ffi::{OsStr, OsString};

use mount_config::Config;
use ortho_config::OrthoConfig;

use crate::AppError;

/// CLI flags recognised by the configuration loader.
///
/// MAINTENANCE: keep in sync with the fields of [`Config`].
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--table-path",
    "--transport",
    "--serial-device",
    "--command-prefix",
    "--command-terminator",
    "--response-terminator",
    "--handler-dir",
    "--timeout-ms",
    "--max-retries",
    "--retry-backoff-ms",
    "--max-backoff-ms",
    "--slew-completion",
    "--log-filter",
    "--log-format",
];

pub(crate) trait ConfigLoader {
    /// Loads configuration from the leading configuration arguments.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Stop,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    let (flag, inline_value) = text
        .split_once('=')
        .map_or((&*text, false), |(flag, _)| (flag, true));
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !inline_value,
        }
    } else {
        FlagAction::Stop
    }
}

/// Arguments partitioned between the configuration loader and `clap`.
///
/// Both halves keep the program name as their first element.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ConfigArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_arguments: Vec<OsString>,
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let mut tokens = args.iter();
    let program: Vec<OsString> = tokens.next().cloned().into_iter().collect();
    let mut split = ConfigArgumentSplit {
        config_arguments: program.clone(),
        command_arguments: program,
    };

    let mut pending_value = false;
    let mut in_config = true;
    for token in tokens {
        if !in_config {
            split.command_arguments.push(token.clone());
        } else if pending_value {
            split.config_arguments.push(token.clone());
            pending_value = false;
        } else {
            match classify(token) {
                FlagAction::Include { needs_value } => {
                    split.config_arguments.push(token.clone());
                    pending_value = needs_value;
                }
                FlagAction::Stop => {
                    in_config = false;
                    split.command_arguments.push(token.clone());
                }
            }
        }
    }
    split
}
