//! # The DurableActor Contract
//!
//! [`DurableActor`] is the capability set an actor implements to be driven by
//! the sequencer: a method probe, lifecycle hooks, state save/restore, and
//! the call handlers. It is the only point where actor-specific logic enters
//! the core.
//!
//! Handlers are deliberately synchronous and return a [`Step`]. A handler
//! that needs the outcome of an outbound call does not hold an implicit
//! runtime continuation across the wait. It issues the call through
//! [`TurnContext::call`], returns [`Step::AwaitCall`], and is re-entered via
//! [`DurableActor::resume`] when the outcome frame arrives. Because the
//! suspension is a value rather than a stack, it can be captured in a
//! checkpoint and reconstructed after a crash.

use crate::call_cache::{CacheError, CallCache, CallOutcome};
use crate::codec::{CallFrame, CallKind, MethodId, SeqNo};

/// How a handler turn ended.
#[derive(Debug)]
pub enum Step {
    /// Nothing further. A blocking caller receives an empty return.
    Done,
    /// Reply bytes for the blocking caller that started this chain. Dropped
    /// with a debug log when the chain has no blocking caller.
    Reply(Vec<u8>),
    /// Park this continuation until the outcome for the given outbound call
    /// arrives, then re-enter through [`DurableActor::resume`].
    AwaitCall(SeqNo),
}

/// Per-turn handle for issuing outbound calls.
///
/// There is no ambient "current actor" registry; everything a handler may do
/// flows through the context it was explicitly given. Frames queued here are
/// emitted after the turn completes, or suppressed wholesale during replay,
/// when the outcome of every call is already in the log.
pub struct TurnContext<'a> {
    replaying: bool,
    next_seq: &'a mut u64,
    cache: &'a mut CallCache,
    outgoing: Vec<CallFrame>,
    fatal: Option<CacheError>,
}

impl<'a> TurnContext<'a> {
    pub(crate) fn new(replaying: bool, next_seq: &'a mut u64, cache: &'a mut CallCache) -> Self {
        Self {
            replaying,
            next_seq,
            cache,
            outgoing: Vec::new(),
            fatal: None,
        }
    }

    /// Issues a blocking outbound call and returns its sequence number. The
    /// caller may park on it with [`Step::AwaitCall`]; an unawaited call's
    /// outcome is dropped when it arrives.
    pub fn call(&mut self, method: MethodId, payload: Vec<u8>) -> SeqNo {
        let seq = self.allocate();
        if let Err(e) = self.cache.register(seq) {
            // Counter regression; surfaced as fatal after the turn.
            if self.fatal.is_none() {
                self.fatal = Some(e);
            }
        }
        self.outgoing.push(CallFrame {
            method,
            kind: CallKind::Blocking,
            seq,
            payload,
        });
        seq
    }

    /// Issues a fire-and-forget outbound call: no tracked outcome, never in
    /// the call cache.
    pub fn send(&mut self, method: MethodId, payload: Vec<u8>) -> SeqNo {
        let seq = self.allocate();
        self.outgoing.push(CallFrame {
            method,
            kind: CallKind::FireAndForget,
            seq,
            payload,
        });
        seq
    }

    /// True while recorded inputs are being re-driven after a restart.
    /// Handlers rarely need this; side effects outside actor state should be
    /// gated on it.
    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    fn allocate(&mut self) -> SeqNo {
        let seq = SeqNo(*self.next_seq);
        *self.next_seq += 1;
        seq
    }

    pub(crate) fn into_effects(self) -> (Vec<CallFrame>, Option<CacheError>) {
        (self.outgoing, self.fatal)
    }
}

/// The capability set of a durable actor.
///
/// All methods run inside the single sequencing context; `&mut self` access
/// is race-free by construction. State mutated here must be fully captured by
/// `on_save_state`, because after a crash the actor is rebuilt from the last
/// checkpoint plus a replay of the log.
pub trait DurableActor: Send + 'static {
    /// Handler fault type, surfaced to a blocking caller as an exception
    /// outcome.
    type Fault: std::error::Error + Send + Sync + 'static;

    /// Whether this actor implements the given method. Frames for other
    /// methods are rejected before they reach the log.
    fn handles(&self, method: MethodId) -> bool;

    /// Fires exactly once in the actor's logical lifetime, the very first
    /// time this identity is instantiated. Replayed from the log during
    /// recovery, so state built here survives a crash that happens before
    /// the first checkpoint.
    fn on_first_start(&mut self, _ctx: &mut TurnContext<'_>) -> Result<(), Self::Fault> {
        Ok(())
    }

    /// Fires once per recovery cycle, after replay completes and before the
    /// first live input. Not logged as a replayable turn, so it must not
    /// originate calls; anything it did would differ between recoveries.
    fn on_becoming_primary(&mut self) {}

    /// Serializes the actor's entire durable state.
    fn on_save_state(&self) -> Result<Vec<u8>, Self::Fault>;

    /// Replaces the actor's state wholesale from a checkpoint image.
    fn on_restore_state(&mut self, bytes: &[u8]) -> Result<(), Self::Fault>;

    /// Handles one inbound call. `frame.kind` is always `Blocking` or
    /// `FireAndForget`.
    fn handle_call(
        &mut self,
        frame: &CallFrame,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Step, Self::Fault>;

    /// Re-enters a continuation parked on `awaited` once its outcome arrived.
    fn resume(
        &mut self,
        awaited: SeqNo,
        outcome: CallOutcome,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Step, Self::Fault>;
}
