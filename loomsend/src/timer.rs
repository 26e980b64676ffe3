//! Single-shot re-armed session timer.
//!
//! One dedicated thread per controller serves two deadline purposes: the
//! retransmission timeout on the oldest unacknowledged message, and expiry
//! of queued admission waiters. Each purpose holds at most one armed
//! deadline; re-arming replaces it. A generation counter on the retry
//! deadline lets the controller discard fires that raced a cancel or
//! re-arm.
//!
//! Lock order: the timer mutex is a leaf. Firing drops it before invoking
//! the controller callback, and the controller may arm or cancel while
//! holding its own lock.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// What fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerEvent {
    /// The retransmission deadline elapsed. Stale generations must be
    /// ignored by the handler.
    Retry { generation: u64 },
    /// At least one queued waiter may have passed its admission deadline.
    WaiterExpiry,
}

#[derive(Debug, Default)]
struct TimerState {
    retry_at: Option<Instant>,
    retry_generation: u64,
    expiry_at: Option<Instant>,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    cond: Condvar,
}

/// Handle to the session timer thread.
pub(crate) struct RetryTimer {
    shared: Arc<TimerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RetryTimer {
    /// Spawn the timer thread. `on_fire` runs on that thread with no timer
    /// lock held. Thread creation failure is resource exhaustion and is
    /// allowed to terminate the process.
    pub fn spawn(on_fire: Box<dyn Fn(TimerEvent) + Send + 'static>) -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState::default()),
            cond: Condvar::new(),
        });

        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("loomsend-timer".into())
            .spawn(move || run_loop(thread_shared, on_fire))
            .expect("spawn session timer thread");

        Self {
            shared,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Arm (or re-arm) the retry deadline, returning the generation the
    /// eventual fire will carry.
    pub fn arm_retry(&self, deadline: Instant) -> u64 {
        let mut state = self.shared.state.lock();
        state.retry_generation += 1;
        state.retry_at = Some(deadline);
        self.shared.cond.notify_one();
        state.retry_generation
    }

    /// Cancel any armed retry deadline. A fire already in flight carries a
    /// stale generation and will be ignored.
    pub fn cancel_retry(&self) {
        let mut state = self.shared.state.lock();
        state.retry_generation += 1;
        state.retry_at = None;
        self.shared.cond.notify_one();
    }

    /// Set or clear the waiter-expiry deadline.
    pub fn arm_expiry(&self, deadline: Option<Instant>) {
        let mut state = self.shared.state.lock();
        state.expiry_at = deadline;
        self.shared.cond.notify_one();
    }

    /// Stop the timer thread. Idempotent; safe to call from the timer
    /// thread itself (the fire path), in which case the thread is detached
    /// instead of joined.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.cond.notify_one();
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn run_loop(shared: Arc<TimerShared>, on_fire: Box<dyn Fn(TimerEvent) + Send>) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }

        let now = Instant::now();
        let mut fired = Vec::new();
        if state.retry_at.is_some_and(|at| at <= now) {
            state.retry_at = None;
            fired.push(TimerEvent::Retry {
                generation: state.retry_generation,
            });
        }
        if state.expiry_at.is_some_and(|at| at <= now) {
            state.expiry_at = None;
            fired.push(TimerEvent::WaiterExpiry);
        }

        if !fired.is_empty() {
            drop(state);
            for event in fired {
                on_fire(event);
            }
            state = shared.state.lock();
            continue;
        }

        let next = match (state.retry_at, state.expiry_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        match next {
            Some(deadline) => {
                shared.cond.wait_until(&mut state, deadline);
            }
            None => shared.cond.wait(&mut state),
        }
    }
}
