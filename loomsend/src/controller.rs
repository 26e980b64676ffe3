//! The transmission controller — sequencing, admission, congestion control
//! and retransmission bookkeeping for one reliable session.
//!
//! A `SendController` decides *what* to hand to the transport next and
//! *when* to retry it; it never touches a socket. Producers call `add`
//! (blocking) or `add_with` (callback) to admit messages; the receive path
//! feeds acknowledgement reports through `process_acknowledgement` /
//! `process_transferred`; a per-session timer thread drives timeout
//! retransmission with multiplicative backoff.
//!
//! All mutable state sits behind one mutex. No caller-supplied callback or
//! blocking wait ever runs while that mutex is held: completions are
//! collected as deferred notices and delivered after the critical section.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Result, SendError};
use crate::range::{SequenceRange, SequenceRangeSet};
use crate::rtt::RttEstimator;
use crate::timer::{RetryTimer, TimerEvent};
use crate::waiter::{AddWaiter, CompletionSignal, Notice, SyncGate};
use crate::window::{TransmitWindow, WindowSlot};

/// Per-session configuration.
#[derive(Debug, Clone)]
pub struct SendConfig {
    /// Identifier carried on log records for this session.
    pub session_id: String,
    /// Seed for the RTT estimator before the first measurement.
    pub initial_rtt: Duration,
    /// Hard cap on the congestion window.
    pub max_window_size: usize,
    /// Solicit an explicit acknowledgement on every message, not just when
    /// the window or quota runs out.
    pub request_acks: bool,
    /// Receiver-advertised outstanding-message budget; `None` is unbounded.
    pub initial_quota: Option<usize>,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            initial_rtt: Duration::from_millis(500),
            max_window_size: 32,
            request_acks: false,
            initial_quota: None,
        }
    }
}

/// Immutable snapshot of one transmission attempt.
///
/// Produced on admission and for every retransmission; `state` is the
/// caller's opaque token, round-tripped unchanged. `ack_requested` tells
/// the transport layer to solicit an explicit acknowledgement for this
/// attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend<S> {
    pub message: Bytes,
    pub sequence_number: u64,
    pub retry_count: u32,
    pub state: S,
    pub ack_requested: bool,
}

/// Outcome of validating an acknowledgement report without applying it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckCheck {
    /// The report acknowledges a sequence number never sent.
    pub invalid_ack: bool,
    /// The report carries new acknowledgement information while omitting
    /// information already known acknowledged — no single receiver state
    /// can explain it.
    pub inconsistent_ack: bool,
}

/// Retransmission report: the caller layer performs the actual send and
/// returns any transport failure, which is routed to the exception
/// callback.
type RetransmitFn<S> = Box<dyn Fn(PendingSend<S>) -> Result<()> + Send + Sync>;
type ExceptionFn = Box<dyn Fn(SendError) + Send + Sync>;

#[derive(Debug, Clone)]
enum Phase {
    Open,
    Closed,
    Aborted,
    Faulted(SendError),
}

struct Inner<S> {
    phase: Phase,
    window: TransmitWindow<S>,
    /// Sequence number of the oldest unacknowledged message; monotone.
    window_start: u64,
    /// Current congestion window.
    window_size: usize,
    max_window_size: usize,
    slow_start_threshold: usize,
    /// Window size at the last loss event, feeding the growth segment.
    loss_window_size: usize,
    quota_remaining: Option<usize>,
    rtt: RttEstimator,
    /// Sequence numbers believed to need resending, oldest first.
    retransmit_queue: VecDeque<u64>,
    /// Final sequence number of the session; 0 until fixed.
    last: u64,
    congestion_ack_count: usize,
    /// Cleared by the first retransmission timeout.
    startup: bool,
    request_acks: bool,
    waiters: VecDeque<AddWaiter<S>>,
    next_waiter_id: u64,
    /// Generation of the currently armed retry deadline.
    retry_generation: u64,
}

struct Shared<S> {
    state: Mutex<Inner<S>>,
    timer: RetryTimer,
    on_retransmit: RetransmitFn<S>,
    on_exception: ExceptionFn,
    session_id: String,
}

impl<S> Drop for Shared<S> {
    fn drop(&mut self) {
        self.timer.shutdown();
    }
}

/// Send-side transmission controller for one reliable session.
///
/// Cheaply cloneable; all clones share the session state.
pub struct SendController<S = ()> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for SendController<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    // Halve an unrepresentable timeout until it fits the clock; reaching
    // zero yields `now`, so this cannot panic for any input.
    let mut timeout = timeout;
    loop {
        if let Some(deadline) = now.checked_add(timeout) {
            return deadline;
        }
        timeout /= 2;
    }
}

impl<S> Inner<S> {
    fn new(config: &SendConfig) -> Self {
        let max_window = config.max_window_size.max(1);
        Self {
            phase: Phase::Open,
            window: TransmitWindow::new(max_window),
            window_start: 1,
            window_size: max_window,
            max_window_size: max_window,
            slow_start_threshold: max_window,
            loss_window_size: max_window,
            quota_remaining: config.initial_quota,
            rtt: RttEstimator::new(config.initial_rtt),
            retransmit_queue: VecDeque::new(),
            last: 0,
            congestion_ack_count: 0,
            startup: true,
            request_acks: config.request_acks,
            waiters: VecDeque::new(),
            next_waiter_id: 1,
            retry_generation: 0,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match &self.phase {
            Phase::Open => Ok(()),
            Phase::Faulted(err) => Err(err.clone()),
            Phase::Closed | Phase::Aborted => Err(SendError::SessionClosed),
        }
    }

    fn ensure_addable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.last != 0 {
            return Err(SendError::AddAfterLast(self.last));
        }
        Ok(())
    }

    /// Next sequence number to assign.
    fn next_sequence(&self) -> u64 {
        self.window_start + self.window.len() as u64
    }

    /// Highest sequence number ever assigned; 0 before the first `add`.
    fn highest_sent(&self) -> u64 {
        self.next_sequence() - 1
    }

    /// Whether a new message may be admitted right now.
    fn admittable(&self) -> bool {
        self.waiters.is_empty()
            && self.window.len() < self.window_size
            && self.quota_remaining.map_or(true, |q| q > 0)
    }
}

impl<S: Clone + Send + 'static> Inner<S> {
    /// Admit one message: assign the next sequence number, store the
    /// buffered copy, and burn quota. Capacity checks are the caller's.
    fn admit(&mut self, message: Bytes, state: S, is_last: bool) -> PendingSend<S> {
        let sequence_number = self.next_sequence();

        if let Some(quota) = self.quota_remaining.as_mut() {
            debug_assert!(*quota > 0, "admission past quota");
            *quota -= 1;
        }

        let fills_window = self.window.len() + 1 >= self.window_size;
        let exhausts_quota = self.quota_remaining == Some(0);
        let ack_requested = self.request_acks || fills_window || exhausts_quota;

        self.window.append(WindowSlot {
            message: message.clone(),
            last_attempt: Instant::now(),
            retry_count: 0,
            state: state.clone(),
            transferred: false,
            ack_requested,
        });

        if is_last {
            self.last = sequence_number;
        }

        PendingSend {
            message,
            sequence_number,
            retry_count: 0,
            state,
            ack_requested,
        }
    }

    fn descriptor_at(&self, pos: usize) -> PendingSend<S> {
        let slot = self.window.get(pos);
        PendingSend {
            message: slot.message.clone(),
            sequence_number: self.window_start + pos as u64,
            retry_count: slot.retry_count,
            state: slot.state.clone(),
            ack_requested: slot.ack_requested,
        }
    }

    /// TCP-like window growth on a contiguous slide of `slide` messages.
    fn update_window_size(&mut self, slide: usize) {
        if self.window_size <= self.slow_start_threshold {
            // Slow start: grow by the number of newly acknowledged messages.
            self.window_size = (self.window_size + slide)
                .min(self.max_window_size)
                .min(self.slow_start_threshold + 1);
        } else {
            // Congestion avoidance: accumulate acknowledgements against a
            // threshold scaled by the post-loss segment size, then grow by
            // exactly one. The constants give near-linear growth above the
            // threshold; only that shape is contractual.
            self.congestion_ack_count += slide;
            let segment = (self
                .loss_window_size
                .saturating_sub(self.slow_start_threshold)
                / 8)
            .max(1);
            let threshold =
                (self.window_size - self.slow_start_threshold) * self.window_size / segment;
            if self.congestion_ack_count > threshold {
                self.window_size = (self.window_size + 1).min(self.max_window_size);
                self.congestion_ack_count = 0;
            }
        }
    }

    /// Enter a terminal phase, draining every queued waiter with the
    /// phase's error and releasing all buffered copies.
    fn terminate(&mut self, phase: Phase) -> Vec<Notice<S>> {
        let waiter_err = match &phase {
            Phase::Faulted(err) => err.clone(),
            _ => SendError::SessionClosed,
        };
        self.phase = phase;

        let mut notices = Vec::with_capacity(self.waiters.len());
        while let Some(waiter) = self.waiters.pop_front() {
            notices.push(waiter.into_notice(Err(waiter_err.clone())));
        }
        self.window.close();
        self.retransmit_queue.clear();
        notices
    }
}

impl<S: Clone + Send + 'static> Shared<S> {
    /// Re-arm the retry deadline at the current RTO.
    fn arm_retry_locked(&self, inner: &mut Inner<S>) {
        match Instant::now().checked_add(inner.rtt.rto()) {
            Some(deadline) => inner.retry_generation = self.timer.arm_retry(deadline),
            // RTO backed off beyond the clock's horizon; nothing to arm.
            None => self.timer.cancel_retry(),
        }
    }

    /// Keep the waiter-expiry deadline at the earliest queued deadline.
    fn update_expiry_locked(&self, inner: &Inner<S>) {
        self.timer
            .arm_expiry(inner.waiters.iter().map(|w| w.deadline).min());
    }

    /// Admit immediately, guarding the sequence space. A would-be rollover
    /// is a session-fatal protocol fault, reported to the caller.
    fn try_admit_now(
        &self,
        inner: &mut Inner<S>,
        message: Bytes,
        state: S,
        is_last: bool,
    ) -> Result<PendingSend<S>> {
        if inner.next_sequence() == u64::MAX {
            return Err(SendError::SequenceOverflow);
        }
        let was_empty = inner.window.is_empty();
        let descriptor = inner.admit(message, state, is_last);
        if was_empty {
            self.arm_retry_locked(inner);
        }
        Ok(descriptor)
    }

    /// Admit as many queued waiters as freed capacity allows, strictly in
    /// FIFO order. Two-phase: every admission happens here under the lock;
    /// the returned notices are signaled by the caller after unlocking, so
    /// no waiter ever observes a partially updated controller.
    fn dequeue_pending_locked(&self, inner: &mut Inner<S>) -> Vec<Notice<S>> {
        let mut notices = Vec::new();
        loop {
            if inner.waiters.is_empty() || !matches!(inner.phase, Phase::Open) {
                break;
            }
            if inner.last != 0 {
                // Nothing queued can legally be admitted any more.
                let last = inner.last;
                while let Some(waiter) = inner.waiters.pop_front() {
                    notices.push(waiter.into_notice(Err(SendError::AddAfterLast(last))));
                }
                break;
            }

            let budget = inner
                .window_size
                .min(inner.quota_remaining.unwrap_or(usize::MAX));
            if inner.window.len() >= budget {
                break;
            }

            let Some(waiter) = inner.waiters.pop_front() else {
                break;
            };
            let (message, state, is_last, signal) = waiter.into_parts();
            match self.try_admit_now(inner, message, state, is_last) {
                Ok(descriptor) => notices.push(Notice::new(signal, Ok(descriptor))),
                Err(err) => {
                    notices.push(Notice::new(signal, Err(err.clone())));
                    notices.extend(inner.terminate(Phase::Faulted(err)));
                    self.timer.cancel_retry();
                    break;
                }
            }
        }
        self.update_expiry_locked(inner);
        notices
    }

    /// Remove a timed-out waiter, resolving the race with concurrent
    /// admission in favor of admission.
    fn remove_waiter(&self, id: u64) -> bool {
        let mut guard = self.state.lock();
        let inner = &mut *guard;
        let before = inner.waiters.len();
        inner.waiters.retain(|w| w.id != id);
        let removed = inner.waiters.len() != before;
        if removed {
            self.update_expiry_locked(inner);
        }
        removed
    }

    fn handle_timer(&self, event: TimerEvent) {
        match event {
            TimerEvent::Retry { generation } => self.handle_retry_timeout(generation),
            TimerEvent::WaiterExpiry => self.expire_waiters(),
        }
    }

    /// Retransmission timeout: collapse the congestion window, double the
    /// RTO and push the oldest unacknowledged message back to the caller.
    fn handle_retry_timeout(&self, generation: u64) {
        let descriptor = {
            let mut guard = self.state.lock();
            let inner = &mut *guard;
            if !matches!(inner.phase, Phase::Open)
                || generation != inner.retry_generation
                || inner.window.is_empty()
            {
                return;
            }

            let now = Instant::now();
            let head = inner.window.get_mut(0);
            head.retry_count += 1;
            head.last_attempt = now;

            inner.loss_window_size = inner.window_size;
            inner.slow_start_threshold = (inner.window_size / 2).max(1);
            inner.window_size = 1;
            inner.congestion_ack_count = 0;
            inner.startup = false;
            inner.rtt.backoff();

            debug!(
                session = %self.session_id,
                seq = inner.window_start,
                rto = ?inner.rtt.rto(),
                "retransmission timeout"
            );

            self.arm_retry_locked(inner);
            inner.descriptor_at(0)
        };

        // Caller code runs with no lock held; its failures are contained
        // at this boundary and reported, never unwound through the timer.
        if let Err(err) = (self.on_retransmit)(descriptor) {
            (self.on_exception)(err);
        }
    }

    /// Release every queued waiter whose admission deadline has passed.
    fn expire_waiters(&self) {
        let mut notices = Vec::new();
        {
            let mut guard = self.state.lock();
            let inner = &mut *guard;
            if !matches!(inner.phase, Phase::Open) {
                return;
            }
            let now = Instant::now();
            let mut pos = 0;
            while pos < inner.waiters.len() {
                if inner.waiters[pos].deadline <= now {
                    if let Some(waiter) = inner.waiters.remove(pos) {
                        let timeout = waiter.timeout;
                        notices.push(waiter.into_notice(Err(SendError::AddTimeout(timeout))));
                    }
                } else {
                    pos += 1;
                }
            }
            self.update_expiry_locked(inner);
        }
        for notice in notices {
            notice.deliver();
        }
    }
}

impl<S: Clone + Send + 'static> SendController<S> {
    /// Create the controller for one reliable session.
    ///
    /// `on_retransmit` is invoked (never under the controller lock) with a
    /// descriptor whenever a message must be put back on the wire; the
    /// caller layer performs the actual send. `on_exception` receives any
    /// failure the controller cannot resolve itself.
    pub fn new(
        config: SendConfig,
        on_retransmit: impl Fn(PendingSend<S>) -> Result<()> + Send + Sync + 'static,
        on_exception: impl Fn(SendError) + Send + Sync + 'static,
    ) -> Self {
        let max_window = config.max_window_size;
        let initial_rtt = config.initial_rtt;
        let shared = Arc::new_cyclic(|weak: &Weak<Shared<S>>| {
            let timer_ref = weak.clone();
            let timer = RetryTimer::spawn(Box::new(move |event| {
                if let Some(shared) = timer_ref.upgrade() {
                    shared.handle_timer(event);
                }
            }));
            Shared {
                state: Mutex::new(Inner::new(&config)),
                timer,
                on_retransmit: Box::new(on_retransmit),
                on_exception: Box::new(on_exception),
                session_id: config.session_id.clone(),
            }
        });

        debug!(
            session = %shared.session_id,
            max_window,
            initial_rtt = ?initial_rtt,
            "send controller created"
        );
        Self { shared }
    }

    /// Submit one message for reliable delivery, blocking until capacity is
    /// available or `timeout` elapses.
    ///
    /// The returned descriptor is the first transmission attempt: the
    /// caller sends `descriptor.message` on the wire. The controller keeps
    /// its own copy; the caller's buffer is free after this returns.
    pub fn add(&self, message: Bytes, timeout: Duration, state: S) -> Result<PendingSend<S>> {
        self.add_internal(message, timeout, state, false)
    }

    /// Like `add`, but also fixes this message as the session's final one,
    /// atomically with its admission.
    pub fn add_last(&self, message: Bytes, timeout: Duration, state: S) -> Result<PendingSend<S>> {
        self.add_internal(message, timeout, state, true)
    }

    fn add_internal(
        &self,
        message: Bytes,
        timeout: Duration,
        state: S,
        is_last: bool,
    ) -> Result<PendingSend<S>> {
        enum Admission<S> {
            Now(PendingSend<S>),
            Queued(u64, Arc<SyncGate<S>>),
        }

        let deadline = deadline_after(timeout);
        let admission = {
            let mut guard = self.shared.state.lock();
            let inner = &mut *guard;
            inner.ensure_addable()?;

            if inner.admittable() {
                match self.shared.try_admit_now(inner, message, state, is_last) {
                    Ok(descriptor) => Admission::Now(descriptor),
                    Err(err) => {
                        let notices = inner.terminate(Phase::Faulted(err.clone()));
                        self.shared.timer.cancel_retry();
                        self.shared.timer.arm_expiry(None);
                        drop(guard);
                        for notice in notices {
                            notice.deliver();
                        }
                        return Err(err);
                    }
                }
            } else {
                let id = inner.next_waiter_id;
                inner.next_waiter_id += 1;
                let gate = SyncGate::new();
                inner.waiters.push_back(AddWaiter {
                    id,
                    message,
                    state,
                    timeout,
                    deadline,
                    is_last,
                    signal: CompletionSignal::Gate(gate.clone()),
                });
                self.shared.update_expiry_locked(inner);
                Admission::Queued(id, gate)
            }
        };

        match admission {
            Admission::Now(descriptor) => Ok(descriptor),
            Admission::Queued(id, gate) => match gate.wait_until(deadline) {
                Some(result) => result,
                None => {
                    if self.shared.remove_waiter(id) {
                        Err(SendError::AddTimeout(timeout))
                    } else {
                        // Lost the race to a concurrent admission (or a
                        // terminal drain); the resolution is imminent.
                        gate.wait()
                    }
                }
            },
        }
    }

    /// Non-blocking admission form. Returns immediately; `callback` is
    /// invoked exactly once with the admission outcome — on this thread
    /// when capacity is immediately available, otherwise from whichever
    /// thread later frees capacity, expires the deadline, or terminates
    /// the session. The callback never runs under the controller lock.
    pub fn add_with(
        &self,
        message: Bytes,
        timeout: Duration,
        state: S,
        callback: impl FnOnce(Result<PendingSend<S>>) + Send + 'static,
    ) {
        let deadline = deadline_after(timeout);
        let mut drained = Vec::new();
        let own = {
            let mut guard = self.shared.state.lock();
            let inner = &mut *guard;
            if let Err(err) = inner.ensure_addable() {
                Some(Notice::new(
                    CompletionSignal::Callback(Box::new(callback)),
                    Err(err),
                ))
            } else if inner.admittable() {
                match self.shared.try_admit_now(inner, message, state, false) {
                    Ok(descriptor) => Some(Notice::new(
                        CompletionSignal::Callback(Box::new(callback)),
                        Ok(descriptor),
                    )),
                    Err(err) => {
                        drained = inner.terminate(Phase::Faulted(err.clone()));
                        self.shared.timer.cancel_retry();
                        self.shared.timer.arm_expiry(None);
                        Some(Notice::new(
                            CompletionSignal::Callback(Box::new(callback)),
                            Err(err),
                        ))
                    }
                }
            } else {
                let id = inner.next_waiter_id;
                inner.next_waiter_id += 1;
                inner.waiters.push_back(AddWaiter {
                    id,
                    message,
                    state,
                    timeout,
                    deadline,
                    is_last: false,
                    signal: CompletionSignal::Callback(Box::new(callback)),
                });
                self.shared.update_expiry_locked(inner);
                None
            }
        };

        for notice in drained {
            notice.deliver();
        }
        if let Some(notice) = own {
            notice.deliver();
        }
    }

    /// Fix the session's last message to the highest sequence number
    /// already assigned. May be called at most once; mutually exclusive
    /// with `add_last` by protocol version.
    pub fn set_last(&self) -> Result<()> {
        let mut guard = self.shared.state.lock();
        let inner = &mut *guard;
        inner.ensure_open()?;
        if inner.last != 0 {
            return Err(SendError::LastAlreadySet);
        }
        let highest = inner.highest_sent();
        if highest == 0 {
            return Err(SendError::NothingAdmitted);
        }
        inner.last = highest;
        Ok(())
    }

    /// Validate an acknowledgement report without applying it.
    pub fn process_acknowledgement(&self, ranges: &[SequenceRange]) -> Result<AckCheck> {
        let set = SequenceRangeSet::from_ranges(ranges)?;
        let guard = self.shared.state.lock();
        let inner = &*guard;
        inner.ensure_open()?;

        let highest_sent = inner.highest_sent();
        if set.max_upper().is_some_and(|upper| upper > highest_sent) {
            return Ok(AckCheck {
                invalid_ack: true,
                inconsistent_ack: false,
            });
        }

        // A consistent report reflects one cumulative receiver state: if it
        // carries anything new, it must also cover everything we already
        // know acknowledged (the slid-out prefix and transferred slots).
        let mut new_info = false;
        let last_acked = inner.window_start - 1;
        let mut misses_old = last_acked >= 1 && !set.covers(1, last_acked);
        for pos in 0..inner.window.len() {
            let seq = inner.window_start + pos as u64;
            let transferred = inner.window.get(pos).transferred;
            if set.contains(seq) {
                if !transferred {
                    new_info = true;
                }
            } else if transferred {
                misses_old = true;
            }
        }

        Ok(AckCheck {
            invalid_ack: false,
            inconsistent_ack: new_info && misses_old,
        })
    }

    /// Apply an acknowledgement report — the only mutator of
    /// acknowledgement state. Returns whether new retransmissions were
    /// queued, in which case the caller should drain `retry_info`.
    ///
    /// Idempotent: replaying an already-processed report changes nothing.
    pub fn process_transferred(
        &self,
        ranges: &[SequenceRange],
        quota: Option<usize>,
    ) -> Result<bool> {
        let set = SequenceRangeSet::from_ranges(ranges)?;
        let mut queued_retransmits = false;
        let notices = {
            let mut guard = self.shared.state.lock();
            let inner = &mut *guard;
            inner.ensure_open()?;

            // Receiver-advertised budget, discounted by what we have in
            // flight past the acknowledgement it accompanied.
            let highest_sent = inner.highest_sent();
            inner.quota_remaining = quota.map(|advertised| {
                let unseen = highest_sent.saturating_sub(set.max_upper().unwrap_or(0));
                advertised.saturating_sub(unseen as usize)
            });

            // How far the contiguous prefix slides, absorbing slots already
            // acknowledged out of order that are now contiguous.
            let mut slide = 0usize;
            if !inner.window.is_empty() {
                if let Some(range) = set.range_containing(inner.window_start) {
                    slide = ((range.upper - inner.window_start + 1) as usize)
                        .min(inner.window.len());
                }
                while slide < inner.window.len() && inner.window.get(slide).transferred {
                    slide += 1;
                }
            }

            if slide > 0 {
                // Slots already marked transferred carry no new
                // acknowledgement information: no window growth, no RTT
                // sample.
                let duplicates = inner.window.transferred_in_range(0, slide);
                let now = Instant::now();
                let startup = inner.startup;
                for slot in inner.window.remove_front(slide) {
                    if !slot.transferred {
                        inner
                            .rtt
                            .update(now.saturating_duration_since(slot.last_attempt), startup);
                    }
                }
                inner.window_start += slide as u64;
                if slide > duplicates {
                    inner.update_window_size(slide - duplicates);
                }
                trace!(
                    session = %self.shared.session_id,
                    window_start = inner.window_start,
                    window_size = inner.window_size,
                    "window slid by {slide}"
                );
            }

            // Coverage strictly inside the window: mark without sliding.
            for pos in 0..inner.window.len() {
                let seq = inner.window_start + pos as u64;
                if set.contains(seq) && !inner.window.get(pos).transferred {
                    inner.window.set_transferred(pos);
                }
            }

            // Once the head has moved, unacknowledged sequence numbers below
            // the highest acknowledged one are receiver-reported gaps.
            if slide > 0 {
                let mut highest_acked = set.max_upper().unwrap_or(0);
                for pos in 0..inner.window.len() {
                    if inner.window.get(pos).transferred {
                        highest_acked = highest_acked.max(inner.window_start + pos as u64);
                    }
                }
                for pos in 0..inner.window.len() {
                    let seq = inner.window_start + pos as u64;
                    if seq >= highest_acked {
                        break;
                    }
                    if !inner.window.get(pos).transferred
                        && !inner.retransmit_queue.contains(&seq)
                    {
                        inner.retransmit_queue.push_back(seq);
                        queued_retransmits = true;
                    }
                }

                if inner.window.is_empty() {
                    self.shared.timer.cancel_retry();
                } else {
                    self.shared.arm_retry_locked(inner);
                }
            }

            self.shared.dequeue_pending_locked(inner)
        };

        for notice in notices {
            notice.deliver();
        }
        Ok(queued_retransmits)
    }

    /// Pull-style drain of the retransmission set.
    ///
    /// `remove == true` first drops the entry returned by the previous
    /// call; callers drain with `retry_info(false)` once, then
    /// `retry_info(true)` until `None`. Entries already acknowledged or
    /// slid out of the window are discarded silently, so an acknowledged
    /// sequence number is never yielded.
    pub fn retry_info(&self, remove: bool) -> Option<PendingSend<S>> {
        let mut guard = self.shared.state.lock();
        let inner = &mut *guard;
        if !matches!(inner.phase, Phase::Open) {
            return None;
        }
        if remove {
            inner.retransmit_queue.pop_front();
        }
        loop {
            let seq = *inner.retransmit_queue.front()?;
            if seq < inner.window_start {
                inner.retransmit_queue.pop_front();
                continue;
            }
            let pos = (seq - inner.window_start) as usize;
            if pos >= inner.window.len() || inner.window.get(pos).transferred {
                inner.retransmit_queue.pop_front();
                continue;
            }
            let now = Instant::now();
            let slot = inner.window.get_mut(pos);
            slot.retry_count += 1;
            slot.last_attempt = now;
            return Some(inner.descriptor_at(pos));
        }
    }

    /// Graceful termination. The caller layer must have failed any
    /// outstanding admissions first; the queue is contractually empty.
    pub fn close(&self) {
        let notices = {
            let mut guard = self.shared.state.lock();
            let inner = &mut *guard;
            if !matches!(inner.phase, Phase::Open) {
                return;
            }
            debug_assert!(inner.waiters.is_empty(), "close with queued admissions");
            debug!(session = %self.shared.session_id, "session closed");
            inner.terminate(Phase::Closed)
        };
        self.shared.timer.shutdown();
        for notice in notices {
            notice.deliver();
        }
    }

    /// Hard termination: every queued waiter is released with a
    /// closed-session error and all buffered copies are discarded.
    /// Idempotent; callable from any thread, including timer callbacks.
    pub fn abort(&self) {
        self.terminate_session(Phase::Aborted);
    }

    /// Terminate with the session's terminal error; queued waiters receive
    /// it verbatim. Idempotent.
    pub fn fault(&self, reason: impl Into<String>) {
        self.terminate_session(Phase::Faulted(SendError::SessionFaulted(reason.into())));
    }

    fn terminate_session(&self, phase: Phase) {
        let notices = {
            let mut guard = self.shared.state.lock();
            let inner = &mut *guard;
            if !matches!(inner.phase, Phase::Open) {
                return;
            }
            debug!(session = %self.shared.session_id, ?phase, "session terminated");
            inner.terminate(phase)
        };
        self.shared.timer.shutdown();
        for notice in notices {
            notice.deliver();
        }
    }

    /// True once the last message is fixed and fully acknowledged.
    pub fn done_transmitting(&self) -> bool {
        let inner = self.shared.state.lock();
        inner.last != 0 && inner.window.is_empty() && inner.window_start > inner.last
    }

    /// Whether anything is still buffered or queued for admission.
    pub fn has_pending(&self) -> bool {
        let inner = self.shared.state.lock();
        !inner.window.is_empty() || !inner.waiters.is_empty()
    }

    /// Sequence number of the session's final message; 0 until fixed.
    pub fn last(&self) -> u64 {
        self.shared.state.lock().last
    }

    /// Receiver-advertised outstanding-message budget; `None` is unbounded.
    pub fn quota_remaining(&self) -> Option<usize> {
        self.shared.state.lock().quota_remaining
    }

    /// Current retransmission timeout.
    pub fn timeout(&self) -> Duration {
        self.shared.state.lock().rtt.rto()
    }

    /// Sequence number of the oldest unacknowledged message.
    pub fn window_start(&self) -> u64 {
        self.shared.state.lock().window_start
    }

    /// Current congestion window.
    pub fn window_size(&self) -> usize {
        self.shared.state.lock().window_size
    }

    /// Number of buffered (sent but unacknowledged) messages.
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().window.len()
    }
}
