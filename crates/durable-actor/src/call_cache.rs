//! # Call Cache
//!
//! Correlates an outbound call's eventual outcome with the continuation that
//! issued it, by sequence number alone. The issuing handler never holds a
//! live reference to the pending call; it parks on the sequence number and is
//! re-entered through [`crate::DurableActor::resume`]. That indirection is
//! what lets a pending call survive a checkpoint and a full restart: the
//! parked set is captured as [`ParkedMarker`]s inside the checkpoint image
//! and re-registered on recovery.
//!
//! Duplicate registration of a sequence number is a protocol invariant
//! violation and is fatal to the sequencer. An outcome for an unknown
//! sequence number is benign (the call may have been resolved before the
//! last checkpoint) and is merely logged by the caller.

use crate::codec::{MethodId, SeqNo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The recorded result of a blocking outbound call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallOutcome {
    Return(Vec<u8>),
    Exception(Vec<u8>),
}

impl CallOutcome {
    pub fn payload(&self) -> &[u8] {
        match self {
            CallOutcome::Return(bytes) | CallOutcome::Exception(bytes) => bytes,
        }
    }
}

/// Where the reply of a parked continuation eventually goes: the inbound
/// blocking call that started the chain. `None` when the chain was started
/// by a fire-and-forget call or a lifecycle hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTo {
    pub method: MethodId,
    pub seq: SeqNo,
}

/// Checkpoint-persisted record of one parked continuation: "this continuation
/// resumes on sequence number `awaiting`".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkedMarker {
    pub awaiting: SeqNo,
    pub reply_to: Option<ReplyTo>,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("sequence number {0} already registered")]
    Duplicate(SeqNo),
    #[error("no pending call with sequence number {0}")]
    NotPending(SeqNo),
    #[error("a continuation is already parked on sequence number {0}")]
    AlreadyParked(SeqNo),
}

/// What [`CallCache::resolve`] found for a sequence number.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolved {
    /// A continuation was parked on the call; the actor must be resumed.
    Parked { reply_to: Option<ReplyTo> },
    /// The call was issued but never awaited; the outcome is dropped.
    Issued,
    /// Nothing tracked under that sequence number.
    Unknown,
}

#[derive(Debug)]
enum PendingCall {
    Issued,
    Parked { reply_to: Option<ReplyTo> },
}

/// Sequence number → in-flight call. A `BTreeMap` keeps the pending set in
/// sequence order, which fixes the resumption order after a restore.
#[derive(Debug, Default)]
pub struct CallCache {
    pending: BTreeMap<SeqNo, PendingCall>,
}

impl CallCache {
    /// Allocates a slot for a freshly issued blocking call.
    pub fn register(&mut self, seq: SeqNo) -> Result<(), CacheError> {
        if self.pending.contains_key(&seq) {
            return Err(CacheError::Duplicate(seq));
        }
        self.pending.insert(seq, PendingCall::Issued);
        Ok(())
    }

    /// Marks the continuation of the current turn as parked on `seq`.
    pub fn park(&mut self, seq: SeqNo, reply_to: Option<ReplyTo>) -> Result<(), CacheError> {
        match self.pending.get_mut(&seq) {
            None => Err(CacheError::NotPending(seq)),
            Some(PendingCall::Parked { .. }) => Err(CacheError::AlreadyParked(seq)),
            Some(slot) => {
                *slot = PendingCall::Parked { reply_to };
                Ok(())
            }
        }
    }

    /// Removes the slot for `seq` and reports what was waiting on it. Each
    /// sequence number can therefore be observed by at most one resumption.
    pub fn resolve(&mut self, seq: SeqNo) -> Resolved {
        match self.pending.remove(&seq) {
            None => Resolved::Unknown,
            Some(PendingCall::Issued) => Resolved::Issued,
            Some(PendingCall::Parked { reply_to }) => Resolved::Parked { reply_to },
        }
    }

    /// Markers for every parked continuation, in ascending sequence order.
    /// Captured into the checkpoint image before any further outcome is
    /// delivered.
    pub fn markers(&self) -> Vec<ParkedMarker> {
        self.pending
            .iter()
            .filter_map(|(seq, call)| match call {
                PendingCall::Issued => None,
                PendingCall::Parked { reply_to } => Some(ParkedMarker {
                    awaiting: *seq,
                    reply_to: *reply_to,
                }),
            })
            .collect()
    }

    /// Rebuilds the cache from checkpoint markers during recovery.
    pub fn restore(markers: &[ParkedMarker]) -> Self {
        let pending = markers
            .iter()
            .map(|m| {
                (
                    m.awaiting,
                    PendingCall::Parked {
                        reply_to: m.reply_to,
                    },
                )
            })
            .collect();
        Self { pending }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(seq: u64) -> Option<ReplyTo> {
        Some(ReplyTo {
            method: MethodId(1),
            seq: SeqNo(seq),
        })
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut cache = CallCache::default();
        cache.register(SeqNo(1)).unwrap();
        assert!(matches!(
            cache.register(SeqNo(1)),
            Err(CacheError::Duplicate(SeqNo(1)))
        ));
    }

    #[test]
    fn resolve_is_at_most_once() {
        let mut cache = CallCache::default();
        cache.register(SeqNo(5)).unwrap();
        cache.park(SeqNo(5), reply(99)).unwrap();

        assert_eq!(
            cache.resolve(SeqNo(5)),
            Resolved::Parked { reply_to: reply(99) }
        );
        assert_eq!(cache.resolve(SeqNo(5)), Resolved::Unknown);
    }

    #[test]
    fn unawaited_call_outcome_is_dropped() {
        let mut cache = CallCache::default();
        cache.register(SeqNo(3)).unwrap();
        assert_eq!(cache.resolve(SeqNo(3)), Resolved::Issued);
    }

    #[test]
    fn park_requires_a_registered_call() {
        let mut cache = CallCache::default();
        assert!(matches!(
            cache.park(SeqNo(8), None),
            Err(CacheError::NotPending(SeqNo(8)))
        ));

        cache.register(SeqNo(8)).unwrap();
        cache.park(SeqNo(8), None).unwrap();
        assert!(matches!(
            cache.park(SeqNo(8), None),
            Err(CacheError::AlreadyParked(SeqNo(8)))
        ));
    }

    #[test]
    fn markers_are_in_sequence_order_and_roundtrip() {
        let mut cache = CallCache::default();
        for seq in [9u64, 2, 5] {
            cache.register(SeqNo(seq)).unwrap();
            cache.park(SeqNo(seq), reply(seq + 100)).unwrap();
        }
        // An issued-but-not-parked call is not captured.
        cache.register(SeqNo(11)).unwrap();

        let markers = cache.markers();
        let order: Vec<u64> = markers.iter().map(|m| m.awaiting.0).collect();
        assert_eq!(order, vec![2, 5, 9]);

        let restored = CallCache::restore(&markers);
        assert_eq!(restored.pending(), 3);
        assert_eq!(
            restored.markers(),
            markers,
            "restore must reproduce the parked set exactly"
        );
    }
}
