//! Dispatch engine.
//!
//! The [`Dispatcher`] owns the transport and the mount session. Each call
//! takes a turn from a FIFO [`DispatchQueue`], resolves the action, checks
//! the session state, encodes the arguments, exchanges the request with
//! bounded retries, decodes the reply and finally applies the state
//! transition. Per-call failures never tear the session down.

mod queue;
mod retry;

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

pub use self::queue::{CancelToken, DispatchQueue};
pub use self::retry::{DispatchSettings, RetryPolicy, SlewCompletion};
use self::queue::{Refusal, Turn};
use crate::codec::{self, Argument, Value};
use crate::error::{DispatchError, TransportError};
use crate::session::{self, MountSession, Outcome, SessionSnapshot, SessionState};
use crate::table::{CommandSpec, CommandTable, SharedTable};
use crate::transport::{Delivery, Reply, Transport, WireRequest};

const ENGINE_TARGET: &str = "mount_dispatch::engine";

const CONNECT: &str = "connect";
const DISCONNECT: &str = "disconnect";
const GET_STATUS: &str = "get_status";
const GET_COORDINATES: &str = "get_coordinates";
const ASYNC_PARAM: &str = "async";

/// Serialised executor of mount actions over one transport.
///
/// # Example
///
/// ```rust,no_run
/// use std::path::Path;
///
/// use mount_dispatch::codec::Argument;
/// use mount_dispatch::engine::{DispatchSettings, Dispatcher};
/// use mount_dispatch::table::CommandTable;
/// use mount_dispatch::transport::ProcessTransport;
///
/// let table = CommandTable::from_path(Path::new("config/bisque.yaml")).unwrap();
/// let dispatcher = Dispatcher::new(
///     table,
///     ProcessTransport::new("resources/bisque"),
///     DispatchSettings::default(),
/// );
/// dispatcher.connect().unwrap();
/// dispatcher.dispatch("unpark", &[]).unwrap();
/// dispatcher
///     .dispatch("slew_to_coordinates", &[Argument::Float(5.5), Argument::Float(-12.5)])
///     .unwrap();
/// ```
pub struct Dispatcher<T> {
    tables: SharedTable,
    settings: DispatchSettings,
    queue: DispatchQueue,
    transport: Mutex<T>,
    session: Mutex<Option<MountSession>>,
}

impl<T: Transport> Dispatcher<T> {
    /// Creates a disconnected dispatcher.
    #[must_use]
    pub fn new(table: CommandTable, transport: T, settings: DispatchSettings) -> Self {
        Self {
            tables: SharedTable::new(table),
            settings,
            queue: DispatchQueue::new(),
            transport: Mutex::new(transport),
            session: Mutex::new(None),
        }
    }

    /// Returns the engine settings.
    #[must_use]
    pub const fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Returns the number of callers waiting for their turn.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.waiting()
    }

    /// Returns the current session state.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Internal`] when the session lock is
    /// poisoned.
    pub fn state(&self) -> Result<SessionState, DispatchError> {
        Ok(self
            .lock_session()?
            .as_ref()
            .map_or(SessionState::Disconnected, MountSession::state))
    }

    /// Returns a serialisable view of the open session, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Internal`] when the session lock is
    /// poisoned.
    pub fn session_snapshot(&self) -> Result<Option<SessionSnapshot>, DispatchError> {
        Ok(self.lock_session()?.as_ref().map(SessionSnapshot::from))
    }

    /// Returns the table that new sessions will use.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Internal`] when the table lock is poisoned.
    pub fn table(&self) -> Result<Arc<CommandTable>, DispatchError> {
        self.tables.snapshot()
    }

    /// Installs a new command table for sessions opened from now on.
    ///
    /// An open session keeps the table it was created with.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Internal`] when the table lock is poisoned.
    pub fn reload(&self, table: CommandTable) -> Result<(), DispatchError> {
        let actions = table.len();
        self.tables.replace(table)?;
        info!(target: ENGINE_TARGET, actions, "command table reloaded");
        Ok(())
    }

    /// Opens the transport and starts a session.
    ///
    /// When the table defines `connect`, it is dispatched once the channel
    /// is open and its result returned; otherwise the result is
    /// [`Value::Ack`].
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidState`] when a session is already
    /// open, or the transport or codec failure that prevented it.
    pub fn connect(&self) -> Result<Value, DispatchError> {
        self.dispatch(CONNECT, &[])
    }

    /// Ends the session and closes the transport.
    ///
    /// # Errors
    ///
    /// Returns the failure of the table's `disconnect` command, if any, or
    /// of closing the transport. The session stays open in that case.
    pub fn disconnect(&self) -> Result<Value, DispatchError> {
        self.dispatch(DISCONNECT, &[])
    }

    /// Dispatches `action` with `args`.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] classifying the failure; the session
    /// state is unchanged unless the reply could not be parsed, in which
    /// case the state becomes [`SessionState::Unknown`].
    pub fn dispatch(&self, action: &str, args: &[Argument]) -> Result<Value, DispatchError> {
        let turn = self.admit(action, None)?;
        self.run(&turn, action, args)
    }

    /// Dispatches `action` unless `cancel` fires while it is still queued.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Cancelled`] when withdrawn before its turn,
    /// otherwise as [`Dispatcher::dispatch`].
    pub fn dispatch_cancellable(
        &self,
        action: &str,
        args: &[Argument],
        cancel: &CancelToken,
    ) -> Result<Value, DispatchError> {
        let turn = self.admit(action, Some(cancel))?;
        self.run(&turn, action, args)
    }

    /// Stops whatever motion the session reports.
    ///
    /// Issues `stop_slewing`, `stop_moving` or `stop_tracking` as an
    /// ordinary queued dispatch; an in-flight command is never abandoned.
    /// Returns `None` when the mount is not moving.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] when the table lacks the stop
    /// action, otherwise as [`Dispatcher::dispatch`].
    pub fn cancel_motion(&self) -> Result<Option<Value>, DispatchError> {
        let stop = match self.state()? {
            SessionState::Slewing => "stop_slewing",
            SessionState::Moving => "stop_moving",
            SessionState::Tracking => "stop_tracking",
            _ => return Ok(None),
        };
        let table = self.session_table()?;
        let action = table
            .get(stop)
            .or_else(|| table.iter().find(|spec| spec.name().starts_with(stop)))
            .map(|spec| spec.name().to_owned())
            .ok_or_else(|| DispatchError::not_found(stop))?;
        info!(target: ENGINE_TARGET, action = %action, "cancelling motion");
        self.dispatch(&action, &[]).map(Some)
    }

    /// Polls `get_status` until the session reaches `target`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::WaitExpired`] when `deadline` passes first,
    /// or the failure of a status dispatch.
    pub fn wait_for_state(
        &self,
        target: SessionState,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Result<SessionState, DispatchError> {
        let started = Instant::now();
        loop {
            self.dispatch(GET_STATUS, &[])?;
            let state = self.state()?;
            if state == target {
                return Ok(state);
            }
            if started.elapsed() + poll_interval > deadline {
                return Err(DispatchError::WaitExpired { target, state });
            }
            thread::sleep(poll_interval);
        }
    }

    fn admit(&self, action: &str, cancel: Option<&CancelToken>) -> Result<Turn<'_>, DispatchError> {
        self.queue.acquire(cancel).map_err(|refusal| match refusal {
            Refusal::Cancelled => {
                debug!(target: ENGINE_TARGET, action, "queued dispatch cancelled");
                DispatchError::Cancelled {
                    action: action.to_owned(),
                }
            }
            Refusal::Poisoned => DispatchError::internal("dispatch queue lock poisoned"),
        })
    }

    fn run(&self, _turn: &Turn<'_>, action: &str, args: &[Argument]) -> Result<Value, DispatchError> {
        match action {
            CONNECT => self.open_session(args),
            DISCONNECT => self.close_session(args),
            _ => self.run_action(action, args),
        }
    }

    fn open_session(&self, args: &[Argument]) -> Result<Value, DispatchError> {
        let state = self.state()?;
        if !session::permits(CONNECT, state) {
            return Err(DispatchError::invalid_state(CONNECT, state));
        }
        let table = self.tables.snapshot()?;
        self.lock_transport()?
            .open()
            .map_err(|source| transport_failure(CONNECT, 1, source))?;

        let greeting = table
            .get(CONNECT)
            .map_or(Ok(Value::Ack), |spec| self.execute(spec, args));
        let value = match greeting {
            Ok(value) => value,
            Err(error) => {
                drop(self.lock_transport()?.close());
                return Err(error);
            }
        };

        let mut session = MountSession::open(table);
        session.record(CONNECT, true);
        *self.lock_session()? = Some(session);
        info!(target: ENGINE_TARGET, state = %SessionState::Connected, "session opened");
        Ok(value)
    }

    fn close_session(&self, args: &[Argument]) -> Result<Value, DispatchError> {
        let Some(table) = self.lock_session()?.as_ref().map(|open| Arc::clone(open.table())) else {
            return Ok(Value::Ack);
        };
        let value = table
            .get(DISCONNECT)
            .map_or(Ok(Value::Ack), |spec| self.execute(spec, args))
            .inspect_err(|_| self.record(DISCONNECT, false))?;
        self.lock_transport()?
            .close()
            .map_err(|source| transport_failure(DISCONNECT, 1, source))?;
        *self.lock_session()? = None;
        info!(target: ENGINE_TARGET, state = %SessionState::Disconnected, "session closed");
        Ok(value)
    }

    fn run_action(&self, action: &str, args: &[Argument]) -> Result<Value, DispatchError> {
        let state = self.state()?;
        let table = self.session_table()?;
        let spec = table.lookup(action)?;
        if !session::permits(action, state) {
            debug!(target: ENGINE_TARGET, action, %state, "action rejected in current state");
            return Err(DispatchError::invalid_state(action, state));
        }

        let value = match self.execute(spec, args) {
            Ok(value) => value,
            Err(error) => {
                if matches!(error, DispatchError::Parse { .. }) {
                    self.mark_unknown(action)?;
                } else {
                    self.record(action, false);
                }
                return Err(error);
            }
        };

        let next = self.apply(spec, args, state, &value)?;
        debug!(target: ENGINE_TARGET, action, from = %state, to = %next, "dispatch complete");
        Ok(value)
    }

    /// Encodes, exchanges and decodes one action.
    fn execute(&self, spec: &CommandSpec, args: &[Argument]) -> Result<Value, DispatchError> {
        let action = spec.name();
        let wire = codec::encode(spec.params(), args).map_err(|source| {
            DispatchError::Validation {
                action: action.to_owned(),
                source,
            }
        })?;
        let request = spec.strategy().request(&wire);
        let reply = if spec.response().is_nothing() {
            Reply::None
        } else {
            Reply::Expected
        };

        let raw = self.exchange_with_retry(spec, &request, reply)?;
        let text = raw.unwrap_or_default();
        codec::decode(spec.response(), &text).map_err(|source| {
            warn!(
                target: ENGINE_TARGET,
                action,
                response = %text,
                error = %source,
                "response does not match grammar"
            );
            DispatchError::Parse {
                action: action.to_owned(),
                source,
            }
        })
    }

    fn exchange_with_retry(
        &self,
        spec: &CommandSpec,
        request: &WireRequest,
        reply: Reply,
    ) -> Result<Option<String>, DispatchError> {
        let action = spec.name();
        let policy = self.settings.retry;
        let mut transport = self.lock_transport()?;
        let repeatable =
            spec.class().is_retryable() || transport.delivery() == Delivery::Idempotent;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            match transport.exchange(request, reply, self.settings.timeout) {
                Ok(raw) => {
                    debug!(
                        target: ENGINE_TARGET,
                        action,
                        attempt,
                        elapsed_ms = elapsed_ms(started),
                        "transport exchange succeeded"
                    );
                    return Ok(raw);
                }
                Err(error) => {
                    let retry =
                        repeatable && error.is_transient() && attempt <= policy.max_retries;
                    if !retry {
                        warn!(
                            target: ENGINE_TARGET,
                            action,
                            attempt,
                            error = %error,
                            "transport exchange failed"
                        );
                        return Err(transport_failure(action, attempt, error));
                    }
                    let pause = policy.backoff(attempt);
                    warn!(
                        target: ENGINE_TARGET,
                        action,
                        attempt,
                        backoff_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "transport exchange failed, retrying"
                    );
                    thread::sleep(pause);
                }
            }
        }
    }

    fn apply(
        &self,
        spec: &CommandSpec,
        args: &[Argument],
        state: SessionState,
        value: &Value,
    ) -> Result<SessionState, DispatchError> {
        let action = spec.name();
        let next = match session::outcome(action) {
            Outcome::Stay => state,
            Outcome::Enter(next) => next,
            Outcome::Slew => self.slew_state(spec, args),
            Outcome::AdoptStatus => session::adopt_status(state, value),
        };
        let mut guard = self.lock_session()?;
        let open = guard
            .as_mut()
            .ok_or_else(|| DispatchError::internal("session closed during dispatch"))?;
        open.set_state(next);
        if action == GET_COORDINATES {
            open.set_last_position(value.clone());
        }
        open.record(action, true);
        Ok(next)
    }

    fn slew_state(&self, spec: &CommandSpec, args: &[Argument]) -> SessionState {
        let fire_and_forget = match self.settings.slew_completion {
            SlewCompletion::ByFlag => async_requested(spec, args),
            SlewCompletion::Acknowledge => false,
            SlewCompletion::PollStatus => true,
        };
        if fire_and_forget {
            SessionState::Slewing
        } else {
            SessionState::Idle
        }
    }

    fn mark_unknown(&self, action: &str) -> Result<(), DispatchError> {
        if let Some(open) = self.lock_session()?.as_mut() {
            warn!(
                target: ENGINE_TARGET,
                action,
                from = %open.state(),
                "outcome unconfirmed, session state unknown"
            );
            open.set_state(SessionState::Unknown);
            open.record(action, false);
        }
        Ok(())
    }

    fn record(&self, action: &str, succeeded: bool) {
        let Ok(mut guard) = self.session.lock() else {
            return;
        };
        if let Some(open) = guard.as_mut() {
            open.record(action, succeeded);
        }
    }

    fn session_table(&self) -> Result<Arc<CommandTable>, DispatchError> {
        let open_table = self
            .lock_session()?
            .as_ref()
            .map(|open| Arc::clone(open.table()));
        open_table.map_or_else(|| self.tables.snapshot(), Ok)
    }

    fn lock_session(&self) -> Result<MutexGuard<'_, Option<MountSession>>, DispatchError> {
        self.session
            .lock()
            .map_err(|_| DispatchError::internal("session lock poisoned"))
    }

    fn lock_transport(&self) -> Result<MutexGuard<'_, T>, DispatchError> {
        self.transport
            .lock()
            .map_err(|_| DispatchError::internal("transport lock poisoned"))
    }
}

fn async_requested(spec: &CommandSpec, args: &[Argument]) -> bool {
    spec.params()
        .iter()
        .zip(args)
        .find(|(param, _)| param.name() == Some(ASYNC_PARAM))
        .is_some_and(|(_, argument)| {
            matches!(argument, Argument::Flag(true) | Argument::Int(1))
        })
}

fn transport_failure(action: &str, attempts: u32, source: TransportError) -> DispatchError {
    DispatchError::Transport {
        action: action.to_owned(),
        attempts,
        source,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests;
