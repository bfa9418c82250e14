//! Delegated handler execution.
//!
//! [`ProcessTransport`] runs one external handler per request. `send`
//! records the invocation and `receive` runs it to completion, so the pair
//! behaves like any other request/reply channel.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{Invocation, Reply, Transport, WireRequest, millis};
use crate::error::TransportError;

const PROCESS_TARGET: &str = "mount_dispatch::transport::process";
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs delegated handlers resolved against a handler directory.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
///
/// use mount_dispatch::transport::{Invocation, ProcessTransport, Transport, WireRequest};
///
/// let mut transport = ProcessTransport::new("resources/bisque");
/// transport.open().unwrap();
/// let request = WireRequest::Invocation(Invocation::new("get_status.py", Vec::new()));
/// transport.send(&request).unwrap();
/// let status = transport.receive(Duration::from_secs(5)).unwrap();
/// ```
#[derive(Debug)]
pub struct ProcessTransport {
    handler_dir: PathBuf,
    pending: Option<Invocation>,
    open: bool,
}

impl ProcessTransport {
    /// Creates a transport resolving relative handler references against
    /// `handler_dir`.
    #[must_use]
    pub fn new(handler_dir: impl Into<PathBuf>) -> Self {
        Self {
            handler_dir: handler_dir.into(),
            pending: None,
            open: false,
        }
    }

    /// Returns the handler directory.
    #[must_use]
    pub fn handler_dir(&self) -> &Path {
        &self.handler_dir
    }

    fn resolve(&self, program: &str) -> PathBuf {
        let path = Path::new(program);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.handler_dir.join(path)
        }
    }

    fn run(&self, invocation: &Invocation, timeout: Duration) -> Result<String, TransportError> {
        let handler = self.resolve(invocation.program());
        debug!(
            target: PROCESS_TARGET,
            handler = %handler.display(),
            args = ?invocation.args(),
            "spawning handler"
        );
        let started = Instant::now();
        let mut child = Command::new(&handler)
            .args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TransportError::SpawnFailed {
                handler: handler.clone(),
                source: source.into(),
            })?;

        let stdout = collect(child.stdout.take());
        let stderr = collect(child.stderr.take());
        let status = wait_with_deadline(&mut child, &handler, timeout)?;
        let output = join(stdout)?;
        let diagnostics = join(stderr)?;

        debug!(
            target: PROCESS_TARGET,
            handler = %handler.display(),
            ?status,
            elapsed_ms = millis(started.elapsed()),
            "handler exited"
        );
        if !status.success() {
            return Err(TransportError::NonZeroExit {
                handler,
                status: status.code().unwrap_or(-1),
                stderr: diagnostics.trim().to_owned(),
            });
        }
        if !diagnostics.trim().is_empty() {
            debug!(
                target: PROCESS_TARGET,
                handler = %handler.display(),
                stderr = %diagnostics.trim(),
                "handler stderr output"
            );
        }
        Ok(output.trim().to_owned())
    }
}

impl Transport for ProcessTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if !self.handler_dir.is_dir() {
            warn!(
                target: PROCESS_TARGET,
                handler_dir = %self.handler_dir.display(),
                "handler directory does not exist"
            );
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.pending = None;
        self.open = false;
        Ok(())
    }

    fn send(&mut self, request: &WireRequest) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        match request {
            WireRequest::Invocation(invocation) => {
                self.pending = Some(invocation.clone());
                Ok(())
            }
            WireRequest::Frame(body) => Err(TransportError::Unsupported {
                message: format!("cannot send protocol frame '{body}' to a handler directory"),
            }),
        }
    }

    fn receive(&mut self, timeout: Duration) -> Result<String, TransportError> {
        let invocation = self.pending.take().ok_or_else(|| TransportError::Unsupported {
            message: String::from("no handler invocation is pending"),
        })?;
        self.run(&invocation, timeout)
    }

    fn exchange(
        &mut self,
        request: &WireRequest,
        reply: Reply,
        timeout: Duration,
    ) -> Result<Option<String>, TransportError> {
        self.send(request)?;
        let output = self.receive(timeout)?;
        Ok(match reply {
            Reply::Expected => Some(output),
            Reply::None => None,
        })
    }
}

fn collect(stream: Option<impl Read + Send + 'static>) -> Option<JoinHandle<std::io::Result<String>>> {
    stream.map(|mut reader| {
        // Undecodable bytes are replaced so the response grammar rejects them.
        thread::spawn(move || {
            let mut bytes = Vec::new();
            reader
                .read_to_end(&mut bytes)
                .map(|_| String::from_utf8_lossy(&bytes).into_owned())
        })
    })
}

fn join(handle: Option<JoinHandle<std::io::Result<String>>>) -> Result<String, TransportError> {
    let Some(reader) = handle else {
        return Ok(String::new());
    };
    reader
        .join()
        .map_err(|_| TransportError::io(std::io::Error::other("output reader panicked")))?
        .map_err(TransportError::io)
}

fn wait_with_deadline(
    child: &mut Child,
    handler: &Path,
    timeout: Duration,
) -> Result<std::process::ExitStatus, TransportError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().map_err(TransportError::io)? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            warn!(
                target: PROCESS_TARGET,
                handler = %handler.display(),
                timeout_ms = millis(timeout),
                "handler timed out, killing process"
            );
            drop(child.kill());
            drop(child.wait());
            return Err(TransportError::Timeout {
                timeout_ms: millis(timeout),
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}
