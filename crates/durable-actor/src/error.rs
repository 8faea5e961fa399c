//! # Core Errors
//!
//! One central error type for the crate surface. Most faults are contained
//! to the frame or entry that caused them; the fatal kinds
//! (`DuplicateSequence`, `InvalidContinuation`, `RecoveryFailed`, log append
//! failure) stop the dispatch loop, because the durable-replay guarantee is
//! worth more than liveness once it is in doubt.

use crate::call_cache::CacheError;
use crate::checkpoint::CheckpointError;
use crate::codec::SeqNo;
use crate::lifecycle::LifecycleError;
use crate::log::LogError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A sequence number was registered twice. Fatal: the monotonic counter
    /// invariant is broken and replay could silently diverge.
    #[error("duplicate sequence number {0}")]
    DuplicateSequence(SeqNo),

    /// A handler parked on a sequence number with no matching pending call,
    /// or one that already carries a continuation. Fatal protocol bug.
    #[error("invalid continuation on sequence number {0}")]
    InvalidContinuation(SeqNo),

    /// Startup could not reconstruct state. Fatal; the sequencer never falls
    /// back to an older checkpoint on its own.
    #[error("recovery failed: {0}")]
    RecoveryFailed(String),

    /// A checkpoint could not be captured or committed. The previous image
    /// remains valid.
    #[error("checkpoint failed: {0}")]
    Checkpoint(String),

    /// An upgrade request was not adopted; the actor keeps running.
    #[error("upgrade rejected: {0}")]
    Upgrade(String),

    /// The durable log refused an append. Fatal: an unlogged input must not
    /// be dispatched.
    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The sequencer's inbox is closed.
    #[error("sequencer closed")]
    SequencerClosed,

    /// The sequencer dropped a response channel.
    #[error("sequencer dropped response channel")]
    SequencerDropped,
}

impl From<CacheError> for CoreError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Duplicate(seq) => CoreError::DuplicateSequence(seq),
            CacheError::NotPending(seq) | CacheError::AlreadyParked(seq) => {
                CoreError::InvalidContinuation(seq)
            }
        }
    }
}

impl From<CheckpointError> for CoreError {
    fn from(e: CheckpointError) -> Self {
        CoreError::Checkpoint(e.to_string())
    }
}
