//! Domain errors raised while loading tables and dispatching mount actions.
//!
//! All errors use `thiserror`-derived enums with structured context so callers
//! can inspect the failure programmatically. I/O errors are wrapped in `Arc`
//! to satisfy the `result_large_err` Clippy lint and keep every error
//! `Send + Sync`.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::session::SessionState;

/// Errors raised while loading a command specification table.
///
/// Load errors are fatal at startup: a table that fails to load is never
/// installed.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The table source could not be read.
    #[error("failed to read command table '{path}': {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The table source is not a well-formed document.
    #[error("command table is malformed: {message}")]
    Syntax {
        /// Parser diagnostic.
        message: String,
    },

    /// Two active entries share the same action name.
    #[error("action '{name}' is declared more than once")]
    Duplicate {
        /// Duplicated action name.
        name: String,
    },

    /// An entry violates the table schema.
    #[error("action '{name}' is invalid: {message}")]
    InvalidEntry {
        /// Action whose entry is invalid.
        name: String,
        /// Description of the violation.
        message: String,
    },
}

impl LoadError {
    /// Creates an invalid entry error.
    pub fn invalid_entry(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEntry {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Caller-supplied arguments do not satisfy the declared parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Too few or too many arguments were supplied.
    #[error("expected {expected} argument(s), got {actual}")]
    Arity {
        /// Declared parameter count.
        expected: usize,
        /// Supplied argument count.
        actual: usize,
    },

    /// An argument has the wrong semantic kind.
    #[error("argument {position} must be {expected}")]
    Kind {
        /// Zero-based argument position.
        position: usize,
        /// Human-readable description of the expected kind.
        expected: String,
    },

    /// An argument has the right kind but cannot be rendered.
    #[error("argument {position} is out of range: {message}")]
    OutOfRange {
        /// Zero-based argument position.
        position: usize,
        /// Why the value was rejected.
        message: String,
    },
}

/// A raw response did not match the declared response grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A literal acknowledgement was expected.
    #[error("expected literal response '{expected}', got '{actual}'")]
    Literal {
        /// Declared literal.
        expected: String,
        /// Response received.
        actual: String,
    },

    /// The response carries the wrong number of tokens.
    #[error("expected {expected} response token(s), got {actual}")]
    Arity {
        /// Declared token count.
        expected: usize,
        /// Token count received.
        actual: usize,
    },

    /// A token could not be parsed as the declared kind.
    #[error("response token {position} should be {expected}: '{token}'")]
    Token {
        /// Zero-based token position.
        position: usize,
        /// Declared kind of the token.
        expected: String,
        /// Offending token text.
        token: String,
    },
}

/// Failures raised by a transport while executing a request.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// No response arrived before the attempt deadline.
    #[error("no response within {timeout_ms}ms")]
    Timeout {
        /// Attempt deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The underlying channel failed.
    #[error("I/O error on mount channel: {source}")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The peer closed the channel.
    #[error("mount channel closed")]
    Closed,

    /// The transport has not been opened.
    #[error("transport is not open")]
    NotOpen,

    /// An external handler could not be started.
    #[error("handler '{handler}' failed to start: {source}")]
    SpawnFailed {
        /// Resolved handler path.
        handler: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// An external handler exited abnormally.
    #[error("handler '{handler}' exited with status {status}: {stderr}")]
    NonZeroExit {
        /// Resolved handler path.
        handler: PathBuf,
        /// Exit status, or -1 when terminated by a signal.
        status: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// The request variant cannot be carried by this transport.
    #[error("unsupported request: {message}")]
    Unsupported {
        /// Description of the mismatch.
        message: String,
    },
}

impl TransportError {
    /// Wraps an I/O error.
    #[must_use]
    pub fn io(source: io::Error) -> Self {
        Self::Io {
            source: Arc::new(source),
        }
    }

    /// Returns `true` for failures where another attempt may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Io { .. } | Self::Closed | Self::NonZeroExit { .. }
        )
    }
}

/// Errors returned to callers of the dispatch engine.
///
/// Every per-call failure is reported through this type; none of them abort
/// the session.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The action is not present in the command table.
    #[error("action '{action}' not found in command table")]
    NotFound {
        /// Requested action.
        action: String,
    },

    /// The action is not permitted in the current session state.
    #[error("action '{action}' is not permitted while the mount is {state}")]
    InvalidState {
        /// Requested action.
        action: String,
        /// State at the time of the request.
        state: SessionState,
    },

    /// The supplied arguments were rejected by the codec.
    #[error("invalid arguments for '{action}': {source}")]
    Validation {
        /// Requested action.
        action: String,
        /// Codec diagnostic.
        #[source]
        source: ValidationError,
    },

    /// The transport failed and retries, if any, were exhausted.
    #[error("transport failed for '{action}' after {attempts} attempt(s): {source}")]
    Transport {
        /// Requested action.
        action: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last transport failure.
        #[source]
        source: TransportError,
    },

    /// The response did not match the declared grammar.
    #[error("unexpected response for '{action}': {source}")]
    Parse {
        /// Requested action.
        action: String,
        /// Grammar diagnostic.
        #[source]
        source: ParseError,
    },

    /// The dispatch was cancelled before it started.
    #[error("dispatch of '{action}' was cancelled before it started")]
    Cancelled {
        /// Requested action.
        action: String,
    },

    /// The mount did not reach the awaited state in time.
    #[error("mount did not become {target} in time (last state {state})")]
    WaitExpired {
        /// Awaited state.
        target: SessionState,
        /// Last observed state.
        state: SessionState,
    },

    /// Internal error (e.g., lock poisoned).
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl DispatchError {
    /// Returns the process exit status associated with this error.
    ///
    /// Caller errors return status 1. Infrastructure failures (transport,
    /// unexpected responses, internal) return status 2.
    #[must_use]
    pub const fn exit_status(&self) -> u8 {
        match self {
            Self::NotFound { .. }
            | Self::InvalidState { .. }
            | Self::Validation { .. }
            | Self::Cancelled { .. } => 1,
            Self::Transport { .. }
            | Self::Parse { .. }
            | Self::WaitExpired { .. }
            | Self::Internal { .. } => 2,
        }
    }

    /// Returns a stable snake-case label for the error variant.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidState { .. } => "invalid_state",
            Self::Validation { .. } => "validation",
            Self::Transport { .. } => "transport",
            Self::Parse { .. } => "parse",
            Self::Cancelled { .. } => "cancelled",
            Self::WaitExpired { .. } => "wait_expired",
            Self::Internal { .. } => "internal",
        }
    }

    /// Creates a not found error.
    pub fn not_found(action: impl Into<String>) -> Self {
        Self::NotFound {
            action: action.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(action: impl Into<String>, state: SessionState) -> Self {
        Self::InvalidState {
            action: action.into(),
            state,
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
