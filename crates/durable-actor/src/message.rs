//! # Sequencer Requests
//!
//! The message types sent from a [`crate::SequencerHandle`] to a running
//! sequencer. Responses travel back over one-shot channels.

use crate::error::CoreError;
use crate::lifecycle::Lifecycle;
use tokio::sync::oneshot;

/// One-shot response channel used by the sequencer.
pub type Response<T> = oneshot::Sender<Result<T, CoreError>>;

/// Diagnostic snapshot of a running sequencer. Reading it never mutates.
#[derive(Clone, Debug)]
pub struct Status {
    pub lifecycle: Lifecycle,
    /// Next log position to be assigned.
    pub position: u64,
    /// Outbound calls still awaiting an outcome.
    pub pending_calls: usize,
}

#[derive(Debug)]
pub(crate) enum SequencerRequest {
    /// One encoded frame from the transport.
    Deliver { bytes: Vec<u8> },
    /// Take a checkpoint at the next entry boundary; replies with the
    /// checkpointed log position.
    Checkpoint { respond_to: Response<u64> },
    /// Adopt a replacement state image (lifecycle `Upgrading`).
    Upgrade {
        state: Vec<u8>,
        respond_to: Response<()>,
    },
    Status {
        respond_to: oneshot::Sender<Status>,
    },
}
