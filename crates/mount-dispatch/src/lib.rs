//! Table-driven command dispatch for telescope mounts.
//!
//! The `mount-dispatch` crate turns symbolic mount actions such as `park` or
//! `slew_to_coordinates` into concrete wire traffic. A declarative
//! [`CommandTable`] decides, per action, whether the command is written to
//! the mount controller in its native line protocol or delegated to an
//! external handler program. Arguments are validated and rendered by the
//! [`codec`], replies are matched against a declared response grammar, and
//! the [`Dispatcher`] serialises every exchange over one transport while
//! tracking the mount's coarse state.
//!
//! # Architecture
//!
//! - [`table`] loads and validates the YAML command table and keeps it
//!   immutable once built.
//! - [`codec`] holds the parameter descriptors and response grammars.
//! - [`transport`] provides the framed serial channel and the external
//!   process runner behind one [`Transport`] trait.
//! - [`session`] records the session and its state machine.
//! - [`engine`] resolves, validates, executes and retries dispatches.
//!
//! # Example
//!
//! ```rust,no_run
//! use mount_dispatch::{CommandTable, DispatchSettings, Dispatcher, Value};
//! use mount_dispatch::transport::{Framing, SerialTransport};
//!
//! let table = CommandTable::load(
//!     "get_coordinates:\n  cmd: GR\n  response: HH:MM:SS sDD*MM:SS\n",
//! )
//! .expect("table loads");
//! let transport = SerialTransport::device("/dev/ttyUSB0", Framing::default());
//! let dispatcher = Dispatcher::new(table, transport, DispatchSettings::default());
//!
//! dispatcher.connect().expect("mount answers");
//! let position = dispatcher.dispatch("get_coordinates", &[]).expect("position");
//! assert!(matches!(position, Value::Tuple(_)));
//! ```

pub mod codec;
pub mod engine;
pub mod error;
pub mod session;
pub mod table;
pub mod transport;

#[cfg(test)]
mod tests;

pub use self::codec::{Angle, Argument, ParamDescriptor, ResponseGrammar, Value};
pub use self::engine::{CancelToken, DispatchSettings, Dispatcher, RetryPolicy, SlewCompletion};
pub use self::error::{DispatchError, LoadError, ParseError, TransportError, ValidationError};
pub use self::session::{SessionSnapshot, SessionState};
pub use self::table::{CommandSpec, CommandTable};
pub use self::transport::{Transport, WireRequest};
