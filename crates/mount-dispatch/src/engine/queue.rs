//! First-come, first-served admission of dispatches.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Interval at which queued callers re-check their cancel token.
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// Cancels a dispatch that has not started yet.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Refusal {
    Cancelled,
    Poisoned,
}

#[derive(Debug, Default)]
struct QueueState {
    next_ticket: u64,
    waiting: VecDeque<u64>,
    busy: bool,
}

/// Ticketed queue granting one turn at a time in arrival order.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl DispatchQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of callers waiting for a turn.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state
            .lock()
            .map_or(0, |state| state.waiting.len())
    }

    /// Blocks until every earlier caller has finished, then returns the
    /// turn. A cancelled token withdraws the caller from the queue.
    pub(crate) fn acquire(&self, cancel: Option<&CancelToken>) -> Result<Turn<'_>, Refusal> {
        let mut state = self.state.lock().map_err(|_| Refusal::Poisoned)?;
        let ticket = state.next_ticket;
        state.next_ticket = state.next_ticket.wrapping_add(1);
        state.waiting.push_back(ticket);

        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                state.waiting.retain(|queued| *queued != ticket);
                self.ready.notify_all();
                return Err(Refusal::Cancelled);
            }
            if !state.busy && state.waiting.front() == Some(&ticket) {
                state.waiting.pop_front();
                state.busy = true;
                return Ok(Turn { queue: self });
            }
            let (next, _) = self
                .ready
                .wait_timeout(state, CANCEL_POLL)
                .map_err(|_| Refusal::Poisoned)?;
            state = next;
        }
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.busy = false;
        self.ready.notify_all();
    }
}

/// Exclusive right to use the transport; released on drop.
#[derive(Debug)]
pub(crate) struct Turn<'a> {
    queue: &'a DispatchQueue,
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        self.queue.release();
    }
}
