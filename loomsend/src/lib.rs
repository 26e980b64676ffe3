//! Loomsend -- send-side transmission control for the Loom reliable
//! messaging protocol.
//!
//! The crate decides *what* to hand to the transport next and *when* to
//! retry it; it never owns a socket. One [`SendController`] per reliable
//! session provides:
//! - **Sequencing**: strictly increasing, gap-free sequence numbers
//! - **Sliding window**: bounded buffering of sent-but-unacknowledged
//!   messages with TCP-like congestion control
//! - **Admission control**: FIFO blocking and callback waiters when the
//!   window or receiver quota is full
//! - **Retransmission**: RTT-estimated timeouts with multiplicative
//!   backoff, plus a pull-style retransmission set fed by selective
//!   acknowledgement gaps

pub mod controller;
pub mod error;
pub mod range;
pub mod rtt;

mod timer;
mod waiter;
mod window;

// Re-export key public types at crate root.
pub use controller::{AckCheck, PendingSend, SendConfig, SendController};
pub use error::{Result, SendError};
pub use range::{SequenceRange, SequenceRangeSet};
pub use rtt::RttEstimator;
