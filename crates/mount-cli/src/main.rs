//! CLI entrypoint for the mount command dispatcher.
//!
//! The binary delegates to [`mount_cli::run`], which loads configuration,
//! initialises telemetry, loads the command table and dispatches the
//! requested actions, writing one JSON line per result.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    mount_cli::run(std::env::args_os(), &mut stdin, &mut stdout, &mut stderr)
}
