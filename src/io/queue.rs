//! Completion queue for asynchronous operations.
//!
//! ```text
//!   submitters            workers                 consumers
//!   ──────────            ───────                 ─────────
//!   ticket() ──┐
//!              ├─ outstanding += 1
//!              └────────► run op ──► complete() ──► completed ──► try_get_outcome()
//!                                    outstanding -= 1            try_wait_for_outcome()
//!
//!   signal() ───────────────────────────────────────────────────► wakes every waiter
//! ```
//!
//! Each outcome is popped under the queue lock, so it reaches exactly one
//! consumer. Delivery order is unspecified.
//!
//! Lifecycle: `Active` → `Draining` → `Destroyed`. Destroying waits for every
//! outstanding operation and throws its outcome away. Because
//! [`AsyncIoQueue::destroy`] takes the queue by value, nothing can use a
//! destroyed queue; callers sharing the queue between threads must still
//! [`signal`](AsyncIoQueue::signal) and stop their waiters before they can
//! reclaim ownership.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::outcome::{AsyncIoOutcome, OutcomeHeader, TaskResult};
use crate::logging::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueuePhase {
    Active,
    Draining,
    Destroyed,
}

struct QueueState {
    phase: QueuePhase,
    completed: VecDeque<AsyncIoOutcome>,
    outstanding: usize,
    signal_epoch: u64,
}

pub(crate) struct QueueShared {
    state: Mutex<QueueState>,
    /// Outcome pushed or signal raised.
    available: Condvar,
    /// `outstanding` reached zero.
    drained: Condvar,
}

impl QueueShared {
    fn complete(&self, outcome: AsyncIoOutcome) {
        let mut state = self.state.lock();
        state.outstanding -= 1;
        if state.phase == QueuePhase::Active {
            state.completed.push_back(outcome);
            self.available.notify_one();
        }
        if state.outstanding == 0 {
            self.drained.notify_all();
        }
    }
}

/// Slot for one in-flight operation.
///
/// Finishing the ticket delivers the outcome. Dropping it unfinished delivers
/// a [`TaskResult::Canceled`] outcome so the queue never waits on it forever.
pub(crate) struct Ticket {
    queue: Arc<QueueShared>,
    header: OutcomeHeader,
    done: bool,
}

impl Ticket {
    pub fn finish(mut self, result: TaskResult, buffer: Option<Vec<u8>>, transferred: u64) {
        self.done = true;
        self.queue
            .complete(AsyncIoOutcome::finish(self.header, result, buffer, transferred));
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if !self.done {
            self.queue
                .complete(AsyncIoOutcome::finish(self.header, TaskResult::Canceled, None, 0));
        }
    }
}

/// Thread-safe queue of finished asynchronous operations.
pub struct AsyncIoQueue {
    shared: Arc<QueueShared>,
}

impl AsyncIoQueue {
    pub fn new() -> Self {
        debug!("creating async i/o queue");
        Self {
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState {
                    phase: QueuePhase::Active,
                    completed: VecDeque::new(),
                    outstanding: 0,
                    signal_epoch: 0,
                }),
                available: Condvar::new(),
                drained: Condvar::new(),
            }),
        }
    }

    pub(crate) fn ticket(&self, header: OutcomeHeader) -> Ticket {
        self.shared.state.lock().outstanding += 1;
        Ticket {
            queue: Arc::clone(&self.shared),
            header,
            done: false,
        }
    }

    /// Take a finished outcome without blocking.
    pub fn try_get_outcome(&self) -> Option<AsyncIoOutcome> {
        self.shared.state.lock().completed.pop_front()
    }

    /// Block until an outcome is available, `timeout` elapses or
    /// [`signal`](Self::signal) is called. `None`, or a timeout too large to
    /// represent as a deadline, waits forever.
    ///
    /// A `None` return proves nothing: the wait may also end early when
    /// another thread won the outcome this one was woken for.
    pub fn try_wait_for_outcome(&self, timeout: Option<Duration>) -> Option<AsyncIoOutcome> {
        // Deadlines past the clock's range mean waiting forever.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.shared.state.lock();
        let epoch = state.signal_epoch;

        loop {
            if let Some(outcome) = state.completed.pop_front() {
                return Some(outcome);
            }
            if state.signal_epoch != epoch {
                return None;
            }
            match deadline {
                None => self.shared.available.wait(&mut state),
                Some(deadline) => {
                    if self
                        .shared
                        .available
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        return state.completed.pop_front();
                    }
                }
            }
        }
    }

    /// Wake every thread blocked in
    /// [`try_wait_for_outcome`](Self::try_wait_for_outcome).
    pub fn signal(&self) {
        let mut state = self.shared.state.lock();
        state.signal_epoch = state.signal_epoch.wrapping_add(1);
        debug!(epoch = state.signal_epoch, "signalling async i/o queue");
        self.shared.available.notify_all();
    }

    /// Outcomes waiting to be collected.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().completed.len()
    }

    /// Operations submitted but not yet finished.
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding
    }

    pub fn phase(&self) -> QueuePhase {
        self.shared.state.lock().phase
    }

    /// Wait for outstanding operations, discard every result and release the
    /// queue.
    pub fn destroy(mut self) {
        self.drain();
    }

    fn drain(&mut self) {
        let mut state = self.shared.state.lock();
        if state.phase == QueuePhase::Destroyed {
            return;
        }
        state.phase = QueuePhase::Draining;
        debug!(outstanding = state.outstanding, "draining async i/o queue");
        state.completed.clear();
        while state.outstanding > 0 {
            self.shared.drained.wait(&mut state);
        }
        state.completed.clear();
        state.phase = QueuePhase::Destroyed;
        debug!("async i/o queue destroyed");
    }
}

impl Default for AsyncIoQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AsyncIoQueue {
    fn drop(&mut self) {
        self.drain();
    }
}

impl std::fmt::Debug for AsyncIoQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("AsyncIoQueue")
            .field("phase", &state.phase)
            .field("pending", &state.completed.len())
            .field("outstanding", &state.outstanding)
            .finish()
    }
}
