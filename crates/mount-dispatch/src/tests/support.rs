//! Scripted transport shared by the engine and behaviour tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::error::TransportError;
use crate::table::CommandTable;
use crate::transport::{Delivery, Reply, Transport, WireRequest};

/// Native table covering every state transition.
pub(crate) const MOUNT_TABLE: &str = r#"
connect:
  cmd: CN
  response: 1
disconnect:
  cmd: DC
  response: 1
get_status:
  cmd: GS
  response: text
get_coordinates:
  cmd: GR
  response: HH:MM:SS sDD*MM:SS
park:
  cmd: hP
  response: 1
unpark:
  cmd: PO
  response: 1
slew_to_coordinates:
  cmd: "MS{0},{1},{2}"
  params:
    - name: ra
      format: hours
    - name: dec
      format: degrees
    - name: async
      format: B
  response: 1
stop_slewing:
  cmd: Q
start_tracking:
  cmd: AT
  response: 1
stop_tracking:
  cmd: ST
  response: 1
move_east:
  cmd: Me
stop_moving_east:
  cmd: Qe
move_ms_north:
  cmd: Mgn
  params: XXXX
"#;

pub(crate) fn mount_table() -> CommandTable {
    CommandTable::load(MOUNT_TABLE).expect("mount table loads")
}

#[derive(Debug, Default)]
struct ScriptState {
    replies: VecDeque<Result<String, TransportError>>,
    sent: Vec<WireRequest>,
    opened: usize,
    closed: usize,
    in_flight: usize,
    max_in_flight: usize,
    delay: Duration,
    idempotent: bool,
}

/// Handle for scripting replies and inspecting traffic.
///
/// Clones share state with the [`ScriptedTransport`] they came from.
#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    state: Arc<Mutex<ScriptState>>,
}

impl Script {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn transport(&self) -> ScriptedTransport {
        ScriptedTransport {
            script: self.clone(),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut ScriptState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub(crate) fn reply(&self, text: &str) -> &Self {
        self.with(|state| state.replies.push_back(Ok(text.to_owned())));
        self
    }

    pub(crate) fn fail(&self, error: TransportError) -> &Self {
        self.with(|state| state.replies.push_back(Err(error)));
        self
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        self.with(|state| state.delay = delay);
    }

    pub(crate) fn set_idempotent(&self) {
        self.with(|state| state.idempotent = true);
    }

    pub(crate) fn sent(&self) -> Vec<WireRequest> {
        self.with(|state| state.sent.clone())
    }

    pub(crate) fn frames(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|request| match request {
                WireRequest::Frame(body) => Some(body),
                WireRequest::Invocation(_) => None,
            })
            .collect()
    }

    pub(crate) fn opened(&self) -> usize {
        self.with(|state| state.opened)
    }

    pub(crate) fn closed(&self) -> usize {
        self.with(|state| state.closed)
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.with(|state| state.in_flight)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.with(|state| state.max_in_flight)
    }
}

/// Transport answering from a script.
///
/// An exchange with nothing scripted succeeds when no reply is expected
/// and times out otherwise.
#[derive(Debug)]
pub(crate) struct ScriptedTransport {
    script: Script,
}

impl Transport for ScriptedTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        self.script.with(|state| state.opened += 1);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.script.with(|state| state.closed += 1);
        Ok(())
    }

    fn send(&mut self, request: &WireRequest) -> Result<(), TransportError> {
        self.script.with(|state| state.sent.push(request.clone()));
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<String, TransportError> {
        self.script.with(|state| state.replies.pop_front()).unwrap_or(Err(
            TransportError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
        ))
    }

    fn exchange(
        &mut self,
        request: &WireRequest,
        reply: Reply,
        timeout: Duration,
    ) -> Result<Option<String>, TransportError> {
        let delay = self.script.with(|state| {
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.delay
        });
        thread::sleep(delay);
        self.send(request)?;
        let outcome = match reply {
            Reply::Expected => self.receive(timeout).map(Some),
            Reply::None => self
                .script
                .with(|state| state.replies.pop_front())
                .map_or(Ok(None), |scripted| scripted.map(|_| None)),
        };
        self.script.with(|state| state.in_flight -= 1);
        outcome
    }

    fn delivery(&self) -> Delivery {
        if self.script.with(|state| state.idempotent) {
            Delivery::Idempotent
        } else {
            Delivery::Unconfirmed
        }
    }
}
