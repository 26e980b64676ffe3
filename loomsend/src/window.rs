//! Bounded sequence buffer — the sliding window of in-flight messages.
//!
//! A fixed-capacity ring buffer holding one independently-owned copy of
//! every unacknowledged message. Positions are relative to the head slot;
//! the controller owns the translation from sequence numbers, so the
//! modular index arithmetic lives in exactly one function here.

use std::time::Instant;

use bytes::Bytes;

/// One in-flight message and its attempt bookkeeping.
#[derive(Debug)]
pub(crate) struct WindowSlot<S> {
    /// Independent serialized copy; the caller's original is not retained.
    pub message: Bytes,
    /// When this message was last handed to the transport.
    pub last_attempt: Instant,
    pub retry_count: u32,
    /// Opaque caller token, round-tripped on every descriptor.
    pub state: S,
    /// Acknowledged out of order, without the window having slid over it.
    pub transferred: bool,
    /// Whether the attempt solicited an explicit acknowledgement.
    pub ack_requested: bool,
}

/// Ring buffer over `max_window + 1` slots, so full and empty are
/// distinguishable without a separate flag.
#[derive(Debug)]
pub(crate) struct TransmitWindow<S> {
    slots: Vec<Option<WindowSlot<S>>>,
    head: usize,
    len: usize,
}

impl<S> TransmitWindow<S> {
    pub fn new(max_window: usize) -> Self {
        let capacity = max_window + 1;
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, head: 0, len: 0 }
    }

    /// Translate a head-relative position into a physical slot index.
    fn index(&self, pos: usize) -> usize {
        debug_assert!(pos < self.len, "position {pos} out of window (len {})", self.len);
        (self.head + pos) % self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append one slot at the tail.
    pub fn append(&mut self, slot: WindowSlot<S>) {
        debug_assert!(self.len + 1 < self.slots.len(), "window overfull");
        let tail = (self.head + self.len) % self.slots.len();
        self.slots[tail] = Some(slot);
        self.len += 1;
    }

    pub fn get(&self, pos: usize) -> &WindowSlot<S> {
        let idx = self.index(pos);
        self.slots[idx].as_ref().expect("occupied window slot")
    }

    pub fn get_mut(&mut self, pos: usize) -> &mut WindowSlot<S> {
        let idx = self.index(pos);
        self.slots[idx].as_mut().expect("occupied window slot")
    }

    /// Mark the slot at `pos` acknowledged out of order.
    pub fn set_transferred(&mut self, pos: usize) {
        self.get_mut(pos).transferred = true;
    }

    /// Count of transferred slots among positions `from..from + count`.
    pub fn transferred_in_range(&self, from: usize, count: usize) -> usize {
        (from..from + count)
            .filter(|&pos| self.get(pos).transferred)
            .count()
    }

    /// Remove `n` slots from the head, returning them oldest-first so the
    /// caller can sample their attempt timestamps before release.
    pub fn remove_front(&mut self, n: usize) -> Vec<WindowSlot<S>> {
        debug_assert!(n <= self.len);
        let mut removed = Vec::with_capacity(n);
        for _ in 0..n {
            let slot = self.slots[self.head].take().expect("occupied window slot");
            removed.push(slot);
            self.head = (self.head + 1) % self.slots.len();
            self.len -= 1;
        }
        removed
    }

    /// Drop every buffered copy.
    pub fn close(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.len = 0;
    }
}
