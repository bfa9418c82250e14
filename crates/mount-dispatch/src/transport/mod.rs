//! Channels over which encoded commands reach the mount.
//!
//! Every transport exposes the same synchronous contract: `send` a
//! [`WireRequest`], then `receive` the raw reply within a deadline. The
//! dispatch engine drives both variants through [`Transport::exchange`] and
//! never inspects which one it holds.

mod process;
mod serial;

use std::time::Duration;

pub use self::process::ProcessTransport;
pub use self::serial::{Framing, SerialTransport};
use crate::error::TransportError;

/// Encoded request ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireRequest {
    /// Command body for a framed line protocol, without framing characters.
    Frame(String),
    /// External handler invocation.
    Invocation(Invocation),
}

/// External handler reference with its positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
}

impl Invocation {
    /// Creates an invocation.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Returns the handler reference.
    #[must_use]
    pub const fn program(&self) -> &str {
        self.program.as_str()
    }

    /// Returns the arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Whether a reply is read after sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Wait for and return the reply.
    Expected,
    /// The command produces no reply.
    None,
}

/// Delivery guarantee a transport offers for repeated attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A failed attempt may still have reached the hardware.
    Unconfirmed,
    /// Repeating a request is guaranteed to execute it at most once.
    Idempotent,
}

/// Synchronous command channel to one mount.
pub trait Transport: Send {
    /// Opens the channel.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the channel cannot be established.
    fn open(&mut self) -> Result<(), TransportError>;

    /// Closes the channel. Closing a closed transport is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when teardown fails.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Sends one request.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unsupported`] for a request variant the
    /// transport cannot carry, or the failure raised while writing.
    fn send(&mut self, request: &WireRequest) -> Result<(), TransportError>;

    /// Waits up to `timeout` for the next reply.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Timeout`] when nothing arrives in time.
    fn receive(&mut self, timeout: Duration) -> Result<String, TransportError>;

    /// Sends `request` and, when a reply is expected, receives it.
    ///
    /// # Errors
    ///
    /// Propagates failures from [`Transport::send`] and
    /// [`Transport::receive`].
    fn exchange(
        &mut self,
        request: &WireRequest,
        reply: Reply,
        timeout: Duration,
    ) -> Result<Option<String>, TransportError> {
        self.send(request)?;
        match reply {
            Reply::Expected => self.receive(timeout).map(Some),
            Reply::None => Ok(None),
        }
    }

    /// Reports whether repeated attempts are safe for any action.
    fn delivery(&self) -> Delivery {
        Delivery::Unconfirmed
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<(), TransportError> {
        (**self).open()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }

    fn send(&mut self, request: &WireRequest) -> Result<(), TransportError> {
        (**self).send(request)
    }

    fn receive(&mut self, timeout: Duration) -> Result<String, TransportError> {
        (**self).receive(timeout)
    }

    fn exchange(
        &mut self,
        request: &WireRequest,
        reply: Reply,
        timeout: Duration,
    ) -> Result<Option<String>, TransportError> {
        (**self).exchange(request, reply, timeout)
    }

    fn delivery(&self) -> Delivery {
        (**self).delivery()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests;
