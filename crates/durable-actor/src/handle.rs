//! # Sequencer Handle
//!
//! The clonable client half of a sequencer: the transport feeds inbound
//! frames through it, and hosts use it for checkpoint requests, upgrades,
//! and diagnostics. Requests travel over the sequencer's mpsc inbox; results
//! come back over one-shot channels.

use crate::error::CoreError;
use crate::message::{SequencerRequest, Status};
use tokio::sync::{mpsc, oneshot};

/// Cheaply clonable handle to a running [`crate::DurableSequencer`].
///
/// Dropping every handle closes the inbox and shuts the sequencer down
/// cleanly after it drains remaining requests.
#[derive(Clone)]
pub struct SequencerHandle {
    sender: mpsc::Sender<SequencerRequest>,
}

impl SequencerHandle {
    pub(crate) fn new(sender: mpsc::Sender<SequencerRequest>) -> Self {
        Self { sender }
    }

    /// Delivers one encoded frame from the transport. Malformed frames are
    /// dropped by the sequencer, not reported here.
    pub async fn deliver(&self, bytes: Vec<u8>) -> Result<(), CoreError> {
        self.sender
            .send(SequencerRequest::Deliver { bytes })
            .await
            .map_err(|_| CoreError::SequencerClosed)
    }

    /// Requests a checkpoint at the next entry boundary and waits for it to
    /// commit. Returns the log position the image covers.
    pub async fn checkpoint(&self) -> Result<u64, CoreError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SequencerRequest::Checkpoint { respond_to })
            .await
            .map_err(|_| CoreError::SequencerClosed)?;
        response.await.map_err(|_| CoreError::SequencerDropped)?
    }

    /// Adopts a replacement state image: the sequencer enters `Upgrading`,
    /// restores the state, checkpoints it, and returns to `Primary`.
    pub async fn upgrade(&self, state: Vec<u8>) -> Result<(), CoreError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SequencerRequest::Upgrade { state, respond_to })
            .await
            .map_err(|_| CoreError::SequencerClosed)?;
        response.await.map_err(|_| CoreError::SequencerDropped)?
    }

    /// Diagnostic snapshot of the sequencer.
    pub async fn status(&self) -> Result<Status, CoreError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SequencerRequest::Status { respond_to })
            .await
            .map_err(|_| CoreError::SequencerClosed)?;
        response.await.map_err(|_| CoreError::SequencerDropped)
    }
}
