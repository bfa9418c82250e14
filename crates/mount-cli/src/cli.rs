//! Command-line interface definitions for `mountctl`.

use clap::{Parser, Subcommand};

/// Command-line interface for the mount command dispatcher.
///
/// Configuration flags such as `--table-path` or `--transport` must precede
/// the subcommand.
#[derive(Parser, Debug)]
#[command(name = "mountctl", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Operation to perform.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Operations offered by `mountctl`.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum CliCommand {
    /// Lists the actions of the loaded command table.
    Actions,
    /// Connects, dispatches one action and disconnects.
    Exec {
        /// Action name, for example `slew_to_coordinates`.
        #[arg(value_name = "ACTION")]
        action: String,
        /// Positional arguments for the action.
        #[arg(
            value_name = "ARG",
            num_args = 0..,
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        arguments: Vec<String>,
    },
    /// Reads `action arg...` lines from standard input and dispatches them
    /// in one session.
    Session,
}
