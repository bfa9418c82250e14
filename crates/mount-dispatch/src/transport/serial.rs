//! Framed line protocol over a serial device or any byte stream.

use std::fs::OpenOptions;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::{Transport, WireRequest, millis};
use crate::error::TransportError;

const SERIAL_TARGET: &str = "mount_dispatch::transport::serial";

/// Framing characters of the native command protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framing {
    prefix: String,
    terminator: String,
    response_terminator: u8,
}

impl Framing {
    /// Creates a framing definition.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unsupported`] when the response terminator
    /// is not a single ASCII character.
    pub fn new(
        prefix: impl Into<String>,
        terminator: impl Into<String>,
        response_terminator: char,
    ) -> Result<Self, TransportError> {
        let byte = u8::try_from(response_terminator)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| TransportError::Unsupported {
                message: format!(
                    "response terminator '{response_terminator}' must be a single ASCII character"
                ),
            })?;
        Ok(Self {
            prefix: prefix.into(),
            terminator: terminator.into(),
            response_terminator: byte,
        })
    }

    /// Wraps a command body in the prefix and terminator.
    #[must_use]
    pub fn frame(&self, body: &str) -> String {
        format!("{}{body}{}", self.prefix, self.terminator)
    }
}

impl Default for Framing {
    /// iOptron-style framing: `:` + body + `#`, replies ending in `#`.
    fn default() -> Self {
        Self {
            prefix: String::from(":"),
            terminator: String::from("#"),
            response_terminator: b'#',
        }
    }
}

type BoxedReader = Box<dyn Read + Send>;
type BoxedWriter = Box<dyn Write + Send>;
type ReplySender = Sender<io::Result<String>>;

enum Endpoint {
    Device(PathBuf),
    Stream(Option<(BoxedReader, BoxedWriter)>),
}

struct Link {
    writer: BoxedWriter,
    replies: Receiver<io::Result<String>>,
}

/// Reader thread shared by successive links of one transport.
///
/// A blocking read cannot be interrupted, so the thread outlives `close`.
/// Each `open` installs a fresh sender in `mailbox`; replies that arrive
/// while no link is open are dropped.
struct ReplyReader {
    mailbox: Arc<Mutex<Option<ReplySender>>>,
    thread: JoinHandle<()>,
}

impl ReplyReader {
    fn spawn(reader: BoxedReader, terminator: u8) -> Result<Self, TransportError> {
        let mailbox = Arc::new(Mutex::new(None));
        let shared = Arc::clone(&mailbox);
        let thread = thread::Builder::new()
            .name(String::from("mount-serial-reader"))
            .spawn(move || read_replies(reader, terminator, &shared))
            .map_err(TransportError::io)?;
        Ok(Self { mailbox, thread })
    }

    fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }

    fn deliver_to(&self, sender: Option<ReplySender>) {
        *self.mailbox.lock().unwrap_or_else(PoisonError::into_inner) = sender;
    }
}

/// Persistent connection speaking a terminator-framed protocol.
///
/// A reader thread splits the incoming byte stream on the response
/// terminator and queues complete replies; `receive` waits on that queue.
/// Reopening a device reuses the reader thread while it is still running.
pub struct SerialTransport {
    endpoint: Endpoint,
    framing: Framing,
    reader: Option<ReplyReader>,
    link: Option<Link>,
}

impl SerialTransport {
    /// Creates a transport that opens `path` for reading and writing.
    #[must_use]
    pub fn device(path: impl Into<PathBuf>, framing: Framing) -> Self {
        Self {
            endpoint: Endpoint::Device(path.into()),
            framing,
            reader: None,
            link: None,
        }
    }

    /// Creates a transport over an existing reader and writer pair.
    ///
    /// The pair is consumed by the first [`Transport::open`]; a stream
    /// transport cannot be reopened after it is closed.
    #[must_use]
    pub fn from_stream(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
        framing: Framing,
    ) -> Self {
        Self {
            endpoint: Endpoint::Stream(Some((Box::new(reader), Box::new(writer)))),
            framing,
            reader: None,
            link: None,
        }
    }

    /// Opens the endpoint, returning a new reader only when the running
    /// reader thread cannot be reused.
    fn connect(&mut self) -> Result<(Option<BoxedReader>, BoxedWriter), TransportError> {
        let reader_running = self.reader.as_ref().is_some_and(ReplyReader::is_running);
        match &mut self.endpoint {
            Endpoint::Device(path) => {
                let file = OpenOptions::new()
                    .read(!reader_running)
                    .write(true)
                    .open(&*path)
                    .map_err(TransportError::io)?;
                let reader: Option<BoxedReader> = if reader_running {
                    None
                } else {
                    Some(Box::new(file.try_clone().map_err(TransportError::io)?))
                };
                debug!(
                    target: SERIAL_TARGET,
                    device = %path.display(),
                    reused_reader = reader_running,
                    "serial device opened"
                );
                Ok((reader, Box::new(file)))
            }
            Endpoint::Stream(pair) => pair
                .take()
                .map(|(reader, writer)| (Some(reader), writer))
                .ok_or(TransportError::Closed),
        }
    }

    fn link(&mut self) -> Result<&mut Link, TransportError> {
        self.link.as_mut().ok_or(TransportError::NotOpen)
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.link.is_some() {
            return Ok(());
        }
        let (fresh_reader, writer) = self.connect()?;
        if let Some(stream) = fresh_reader {
            self.reader = Some(ReplyReader::spawn(stream, self.framing.response_terminator)?);
        }
        let reader = self.reader.as_ref().ok_or(TransportError::NotOpen)?;
        let (sender, replies) = mpsc::channel();
        reader.deliver_to(Some(sender));
        self.link = Some(Link { writer, replies });
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(reader) = &self.reader {
            reader.deliver_to(None);
        }
        self.link = None;
        Ok(())
    }

    fn send(&mut self, request: &WireRequest) -> Result<(), TransportError> {
        let WireRequest::Frame(body) = request else {
            return Err(TransportError::Unsupported {
                message: String::from("a serial line cannot run handler invocations"),
            });
        };
        let frame = self.framing.frame(body);
        let link = self.link()?;
        while let Ok(stale) = link.replies.try_recv() {
            warn!(
                target: SERIAL_TARGET,
                stale = ?stale,
                "discarding reply left over from an earlier attempt"
            );
        }
        debug!(target: SERIAL_TARGET, frame = %frame, "writing frame");
        link.writer
            .write_all(frame.as_bytes())
            .and_then(|()| link.writer.flush())
            .map_err(|error| match error.kind() {
                io::ErrorKind::BrokenPipe => TransportError::Closed,
                _ => TransportError::io(error),
            })
    }

    fn receive(&mut self, timeout: Duration) -> Result<String, TransportError> {
        let link = self.link()?;
        match link.replies.recv_timeout(timeout) {
            Ok(Ok(reply)) => {
                debug!(target: SERIAL_TARGET, reply = %reply, "reply received");
                Ok(reply)
            }
            Ok(Err(error)) => Err(TransportError::io(error)),
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout {
                timeout_ms: millis(timeout),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }
}

fn read_replies(reader: BoxedReader, terminator: u8, mailbox: &Mutex<Option<ReplySender>>) {
    for chunk in BufReader::new(reader).split(terminator) {
        let message = chunk.map(|bytes| {
            String::from_utf8_lossy(&bytes)
                .trim_matches(|c: char| c.is_ascii_whitespace())
                .to_owned()
        });
        let failed = message.is_err();
        let mut current = mailbox.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = current.as_ref() else {
            debug!(
                target: SERIAL_TARGET,
                message = ?message,
                "dropping reply that arrived while the link was closed"
            );
            if failed {
                return;
            }
            continue;
        };
        if sender.send(message).is_err() || failed {
            *current = None;
        }
        if failed {
            return;
        }
    }
    debug!(target: SERIAL_TARGET, "serial stream reached end of file");
    // Dropping the sender lets a waiting receive report the closed stream.
    *mailbox.lock().unwrap_or_else(PoisonError::into_inner) = None;
}
