//! Admission waiters — callers parked because the window or quota is full.
//!
//! One internal representation with two completion front-ends: a blocking
//! gate the calling thread waits on, and a boxed callback invoked from
//! whichever thread later frees capacity. Admit, timeout, abort and fault
//! all funnel through the same once-only resolution, and every signal is
//! delivered as a deferred `Notice` after the controller's critical
//! section has been released.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::controller::PendingSend;
use crate::error::Result;

/// Completion callback for the non-blocking admission form.
pub type AddCallback<S> = Box<dyn FnOnce(Result<PendingSend<S>>) + Send + 'static>;

/// One-shot result cell a blocking `add` parks on.
pub(crate) struct SyncGate<S> {
    slot: Mutex<Option<Result<PendingSend<S>>>>,
    cond: Condvar,
}

impl<S> SyncGate<S> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(None),
            cond: Condvar::new(),
        })
    }

    /// Resolve the gate. Must be called at most once.
    pub fn set(&self, result: Result<PendingSend<S>>) {
        let mut slot = self.slot.lock();
        debug_assert!(slot.is_none(), "waiter resolved twice");
        *slot = Some(result);
        self.cond.notify_one();
    }

    /// Wait for resolution until `deadline`. `None` means the deadline
    /// passed first; the caller must then race its removal from the queue
    /// against a concurrent admission.
    pub fn wait_until(&self, deadline: Instant) -> Option<Result<PendingSend<S>>> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(result) = slot.take() {
                return Some(result);
            }
            if self.cond.wait_until(&mut slot, deadline).timed_out() {
                return slot.take();
            }
        }
    }

    /// Wait without a deadline. Only used once the waiter is known to have
    /// left the queue, so resolution is imminent.
    pub fn wait(&self) -> Result<PendingSend<S>> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            self.cond.wait(&mut slot);
        }
    }
}

/// How a waiter's completion is delivered.
pub(crate) enum CompletionSignal<S> {
    Gate(Arc<SyncGate<S>>),
    Callback(AddCallback<S>),
}

/// A parked admission request, FIFO-queued inside the controller.
pub(crate) struct AddWaiter<S> {
    pub id: u64,
    pub message: Bytes,
    pub state: S,
    pub timeout: Duration,
    pub deadline: Instant,
    /// Admission of this waiter also fixes the session's last message.
    pub is_last: bool,
    pub signal: CompletionSignal<S>,
}

impl<S> AddWaiter<S> {
    /// Split into the admission payload and the completion signal.
    pub fn into_parts(self) -> (Bytes, S, bool, CompletionSignal<S>) {
        (self.message, self.state, self.is_last, self.signal)
    }

    /// Resolve without admitting, discarding the queued message.
    pub fn into_notice(self, result: Result<PendingSend<S>>) -> Notice<S> {
        Notice {
            signal: self.signal,
            result,
        }
    }
}

/// A resolved completion, held until the controller lock is released and
/// then delivered — caller code never runs inside the critical section.
pub(crate) struct Notice<S> {
    signal: CompletionSignal<S>,
    result: Result<PendingSend<S>>,
}

impl<S> Notice<S> {
    pub fn new(signal: CompletionSignal<S>, result: Result<PendingSend<S>>) -> Self {
        Self { signal, result }
    }

    pub fn deliver(self) {
        match self.signal {
            CompletionSignal::Gate(gate) => gate.set(self.result),
            CompletionSignal::Callback(callback) => callback(self.result),
        }
    }
}
