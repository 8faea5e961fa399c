//! # durable-actor
//!
//! A durable-actor execution core: a stateful service survives process
//! crashes and restarts by reconstructing its exact pre-crash state from a
//! persisted log and checkpoint, then resumes live traffic with no
//! observable loss or duplication of effects.
//!
//! ## Architecture
//!
//! The crate separates the problem into five pieces, leaves first:
//!
//! 1. **[`codec`]**: length-prefixed binary call frames, byte-stable across
//!    machines so a log written on one host replays identically on another.
//! 2. **[`call_cache`]**: correlates each blocking outbound call with the
//!    continuation that issued it, by sequence number alone, so a pending
//!    call can outlive a checkpoint and a restart.
//! 3. **[`log`] / [`checkpoint`]**: the durable truth. Actor state is only
//!    a cache of "log replayed to position X"; a checkpoint records that
//!    position alongside the serialized state and the parked continuations.
//! 4. **[`sequencer`]**: the single dispatch loop per actor identity. It
//!    replays recorded entries during recovery, then feeds live input to the
//!    actor in strict order and drives checkpoints between entries.
//! 5. **[`lifecycle`]**: which of the above is active at any moment
//!    (`Recovering → BecomingPrimary → Primary ⇄ Upgrading`).
//!
//! ## The continuation model
//!
//! Handlers are synchronous and single-stepped. A handler that needs the
//! result of an outbound call issues it through [`TurnContext::call`],
//! returns [`Step::AwaitCall`], and is re-entered through
//! [`DurableActor::resume`] when the outcome frame arrives. The suspension
//! is a value (a sequence number), not a stack, so a checkpoint taken while
//! the call is in flight captures it as a marker, and after a restart the
//! continuation resumes exactly once, as if nothing had happened.
//!
//! ## Concurrency model
//!
//! One sequencer task owns the actor outright. Handlers never run
//! concurrently, so actor state needs no locks; suspension happens only at
//! the `AwaitCall` boundary, and entries are never reordered relative to the
//! log. Hosts talk to the sequencer through a clonable [`SequencerHandle`]
//! and wire its outbound frame stream to whatever transport they use.
//!
//! ## Sketch
//!
//! ```rust,ignore
//! let config = SequencerConfig::new(log, checkpoints)
//!     .with_policy(CheckpointPolicy::every_calls(256));
//! let (sequencer, handle, outbound) = DurableSequencer::new(actor, config);
//! let running = tokio::spawn(sequencer.run());
//!
//! // transport in: handle.deliver(frame_bytes).await?
//! // transport out: outbound.recv().await
//! // ops: handle.checkpoint().await?, handle.status().await?
//! ```

pub mod actor;
pub mod call_cache;
pub mod checkpoint;
pub mod codec;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod log;
pub mod message;
pub mod policy;
pub mod sequencer;
pub mod telemetry;

pub use actor::{DurableActor, Step, TurnContext};
pub use call_cache::{CallCache, CallOutcome, ParkedMarker, ReplyTo, Resolved};
pub use checkpoint::{CheckpointImage, CheckpointStore, FileCheckpoints, MemoryCheckpoints};
pub use codec::{CallFrame, CallKind, MethodId, SeqNo};
pub use error::CoreError;
pub use handle::SequencerHandle;
pub use lifecycle::Lifecycle;
pub use log::{FileLog, LifecycleEvent, LogEntry, LogStore, MemoryLog};
pub use message::Status;
pub use policy::CheckpointPolicy;
pub use sequencer::{DurableSequencer, SequencerConfig};
pub use telemetry::setup_tracing;
