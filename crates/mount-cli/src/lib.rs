//! Runtime for the `mountctl` binary.
//!
//! `mountctl` loads a command table, opens the configured transport and
//! dispatches actions through [`mount_dispatch::Dispatcher`]. Every
//! dispatched action produces one JSON line on standard output; diagnostics
//! go to standard error through `tracing`.

use std::ffi::OsString;
use std::io::{BufRead, Write};
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use mount_config::{Config, TransportKind};
use mount_dispatch::transport::{Framing, ProcessTransport, SerialTransport};
use mount_dispatch::{
    Argument, CommandTable, DispatchError, DispatchSettings, Dispatcher, RetryPolicy,
    SessionState, Transport, ValidationError, Value,
};
use tracing::{debug, info};

mod cli;
mod config;
mod errors;
mod output;
pub mod telemetry;


use cli::{Cli, CliCommand};
use config::{ConfigLoader, OrthoConfigLoader, split_config_arguments};
pub(crate) use errors::AppError;
use output::{ActionLine, DispatchLine};

const CLI_TARGET: &str = "mount_cli";

type MountDispatcher = Dispatcher<Box<dyn Transport>>;

/// Standard streams used by one CLI invocation.
pub(crate) struct IoStreams<'a, R, W, E> {
    pub(crate) stdin: &'a mut R,
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

/// Runs `mountctl` with the given arguments and standard streams.
///
/// The exit code is `0` on success, `1` when the caller asked for something
/// invalid and `2` when the mount or the local setup failed.
#[must_use]
pub fn run<I, R, W, E>(args: I, stdin: &mut R, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    E: Write,
{
    let mut io = IoStreams {
        stdin,
        stdout,
        stderr,
    };
    run_with_loader(args, &mut io, &OrthoConfigLoader)
}

pub(crate) fn run_with_loader<I, R, W, E>(
    args: I,
    io: &mut IoStreams<'_, R, W, E>,
    loader: &dyn ConfigLoader,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    E: Write,
{
    let arguments: Vec<OsString> = args.into_iter().collect();
    match execute(&arguments, io, loader) {
        Ok(status) => ExitCode::from(status),
        Err(error) => {
            drop(writeln!(io.stderr, "mountctl: {error}"));
            ExitCode::from(error.exit_status())
        }
    }
}

fn execute<R, W, E>(
    arguments: &[OsString],
    io: &mut IoStreams<'_, R, W, E>,
    loader: &dyn ConfigLoader,
) -> Result<u8, AppError>
where
    R: BufRead,
    W: Write,
    E: Write,
{
    let split = split_config_arguments(arguments);
    let cli = match Cli::try_parse_from(&split.command_arguments) {
        Ok(cli) => cli,
        Err(error) if is_informational(&error) => {
            write!(io.stdout, "{error}").map_err(AppError::WriteOutput)?;
            return Ok(0);
        }
        Err(error) => return Err(AppError::CliUsage(error)),
    };

    let config = loader.load(&split.config_arguments)?;
    telemetry::initialise(&config)?;
    let table = CommandTable::from_path(config.table_path().as_std_path())?;
    debug!(
        target: CLI_TARGET,
        table = %config.table_path(),
        actions = table.len(),
        "command table loaded"
    );

    match cli.command {
        CliCommand::Actions => list_actions(&table, io.stdout),
        CliCommand::Exec { action, arguments } => {
            let dispatcher = build_dispatcher(&config, table)?;
            exec(&dispatcher, &action, &arguments, io.stdout)
        }
        CliCommand::Session => {
            let dispatcher = build_dispatcher(&config, table)?;
            session(&dispatcher, io.stdin, io.stdout)
        }
    }
}

fn is_informational(error: &clap::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
    )
}

fn build_dispatcher(config: &Config, table: CommandTable) -> Result<MountDispatcher, AppError> {
    let transport: Box<dyn Transport> = match config.transport() {
        TransportKind::Process => {
            Box::new(ProcessTransport::new(config.handler_dir().as_std_path()))
        }
        TransportKind::Serial => {
            let framing = Framing::new(
                config.command_prefix(),
                config.command_terminator(),
                config.response_terminator(),
            )
            .map_err(AppError::Framing)?;
            Box::new(SerialTransport::device(
                config.serial_device().as_std_path(),
                framing,
            ))
        }
    };
    info!(
        target: CLI_TARGET,
        transport = %config.transport(),
        slew_completion = %config.slew_completion(),
        "dispatcher ready"
    );
    Ok(Dispatcher::new(table, transport, dispatch_settings(config)))
}

const fn dispatch_settings(config: &Config) -> DispatchSettings {
    DispatchSettings {
        timeout: config.timeout(),
        retry: RetryPolicy::exponential(
            config.max_retries(),
            config.retry_backoff(),
            config.max_backoff(),
        ),
        slew_completion: config.slew_completion(),
    }
}

fn list_actions<W: Write>(table: &CommandTable, stdout: &mut W) -> Result<u8, AppError> {
    for spec in table.iter() {
        let line = serde_json::to_string(&ActionLine::from(spec))?;
        writeln!(stdout, "{line}").map_err(AppError::WriteOutput)?;
    }
    Ok(0)
}

fn exec<W: Write>(
    dispatcher: &MountDispatcher,
    action: &str,
    words: &[String],
    stdout: &mut W,
) -> Result<u8, AppError> {
    let opened = dispatcher.connect();
    if opened.is_err() {
        emit(stdout, "connect", &opened, dispatcher.state()?)?;
        return Ok(status_of(&opened));
    }

    let result = dispatch_words(dispatcher, action, words);
    emit(stdout, action, &result, dispatcher.state()?)?;
    let closed = close(dispatcher, stdout)?;
    Ok(status_of(&result).max(closed))
}

fn session<R: BufRead, W: Write>(
    dispatcher: &MountDispatcher,
    stdin: &mut R,
    stdout: &mut W,
) -> Result<u8, AppError> {
    let opened = dispatcher.connect();
    if opened.is_err() {
        emit(stdout, "connect", &opened, dispatcher.state()?)?;
        return Ok(status_of(&opened));
    }

    let mut worst = 0;
    for read in stdin.lines() {
        let text = read.map_err(AppError::ReadInput)?;
        let mut words = text.split_whitespace();
        let Some(action) = words.next().filter(|word| !word.starts_with('#')) else {
            continue;
        };
        let rest: Vec<String> = words.map(str::to_owned).collect();
        let result = dispatch_words(dispatcher, action, &rest);
        emit(stdout, action, &result, dispatcher.state()?)?;
        worst = worst.max(status_of(&result));
    }

    if dispatcher.state()?.is_connected() {
        worst = worst.max(close(dispatcher, stdout)?);
    }
    Ok(worst)
}

/// Disconnects, reporting only a failed teardown.
fn close<W: Write>(dispatcher: &MountDispatcher, stdout: &mut W) -> Result<u8, AppError> {
    let closed = dispatcher.disconnect();
    if closed.is_err() {
        emit(stdout, "disconnect", &closed, dispatcher.state()?)?;
    }
    Ok(status_of(&closed))
}

fn dispatch_words(
    dispatcher: &MountDispatcher,
    action: &str,
    words: &[String],
) -> Result<Value, DispatchError> {
    let arguments = parse_arguments(dispatcher, action, words)?;
    dispatcher.dispatch(action, &arguments)
}

/// Converts textual arguments using the descriptors declared for `action`.
///
/// Actions missing from the table pass through untouched so the dispatcher
/// reports them. The session state is checked before any conversion so a
/// refused action reports `invalid_state` whatever its arguments.
fn parse_arguments(
    dispatcher: &MountDispatcher,
    action: &str,
    words: &[String],
) -> Result<Vec<Argument>, DispatchError> {
    let table = dispatcher.table()?;
    let Some(spec) = table.get(action) else {
        return Ok(Vec::new());
    };
    let state = dispatcher.state()?;
    if !mount_dispatch::session::permits(action, state) {
        return Err(DispatchError::invalid_state(action, state));
    }
    let invalid = |source| DispatchError::Validation {
        action: action.to_owned(),
        source,
    };
    let params = spec.params();
    if params.len() != words.len() {
        return Err(invalid(ValidationError::Arity {
            expected: params.len(),
            actual: words.len(),
        }));
    }
    params
        .iter()
        .zip(words)
        .enumerate()
        .map(|(position, (descriptor, word))| {
            Argument::from_text(descriptor, position, word).map_err(invalid)
        })
        .collect()
}

fn emit<W: Write>(
    stdout: &mut W,
    action: &str,
    result: &Result<Value, DispatchError>,
    state: SessionState,
) -> Result<(), AppError> {
    let line = serde_json::to_string(&DispatchLine::new(action, result, state))?;
    writeln!(stdout, "{line}").map_err(AppError::WriteOutput)
}

fn status_of(result: &Result<Value, DispatchError>) -> u8 {
    result
        .as_ref()
        .map_or_else(DispatchError::exit_status, |_| 0)
}
