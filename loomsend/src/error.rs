use std::time::Duration;

use thiserror::Error;

/// All errors produced by the loomsend control plane.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("session is closed")]
    SessionClosed,

    #[error("session faulted: {0}")]
    SessionFaulted(String),

    #[error("admission timed out after {0:?}")]
    AddTimeout(Duration),

    #[error("sequence number space exhausted")]
    SequenceOverflow,

    #[error("last message already fixed at sequence {0}")]
    AddAfterLast(u64),

    #[error("last message already set")]
    LastAlreadySet,

    #[error("cannot fix the last message: nothing has been admitted")]
    NothingAdmitted,

    #[error("invalid sequence range [{lower}, {upper}]")]
    InvalidRange { lower: u64, upper: u64 },

    #[error("transport send failed: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, SendError>;
