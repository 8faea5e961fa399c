//! # Dispatch Loop & Recovery
//!
//! [`DurableSequencer`] is the single sequencer for one actor identity. It
//! owns the actor, the call cache, and the lifecycle state, and it is the
//! only code that ever invokes actor handlers: one log entry at a time, in
//! strict log order, so dispatch is deterministic by construction.
//!
//! `run()` first recovers: it loads the latest checkpoint, replays every log
//! entry past the checkpoint position with outputs suppressed, fires the
//! becoming-primary hook, and only then starts consuming live requests from
//! its inbox. A fatal error ([`CoreError::RecoveryFailed`],
//! [`CoreError::DuplicateSequence`], [`CoreError::InvalidContinuation`], or
//! a log append failure) stops the loop and is returned to the host;
//! everything else is contained to the frame that caused it.
//!
//! Checkpoint priority: a due policy checkpoint is taken at the top of every
//! loop iteration, before the next queued request (including a ready
//! outcome) is dispatched. That is what makes a blocking outbound call safe
//! to span a checkpoint: the parked continuation is captured as a marker
//! first, and its outcome is delivered afterwards (possibly in the next
//! process lifetime).

use crate::actor::{DurableActor, Step, TurnContext};
use crate::call_cache::{CallCache, CallOutcome, ReplyTo, Resolved};
use crate::checkpoint::{CheckpointImage, CheckpointStore};
use crate::codec::{self, CallFrame, CallKind};
use crate::error::CoreError;
use crate::handle::SequencerHandle;
use crate::lifecycle::Lifecycle;
use crate::log::{LifecycleEvent, LogEntry, LogStore};
use crate::message::{SequencerRequest, Status};
use crate::policy::{CheckpointMeter, CheckpointPolicy};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Wiring for a sequencer: its durable stores and tuning knobs.
pub struct SequencerConfig {
    pub log: Arc<dyn LogStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub policy: CheckpointPolicy,
    pub inbox_capacity: usize,
    pub outbound_capacity: usize,
}

impl SequencerConfig {
    pub fn new(log: Arc<dyn LogStore>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            log,
            checkpoints,
            policy: CheckpointPolicy::default(),
            inbox_capacity: 64,
            outbound_capacity: 64,
        }
    }

    pub fn with_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// What a turn dispatches into the actor.
enum Turn<'a> {
    Call(&'a CallFrame),
    Resume(crate::codec::SeqNo, CallOutcome),
    FirstStart,
}

/// The single sequencer for one actor identity.
pub struct DurableSequencer<A: DurableActor> {
    actor: A,
    lifecycle: Lifecycle,
    cache: CallCache,
    next_seq: u64,
    /// Next log position to be assigned.
    position: u64,
    log: Arc<dyn LogStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    policy: CheckpointPolicy,
    meter: CheckpointMeter,
    inbox: mpsc::Receiver<SequencerRequest>,
    outbound: mpsc::Sender<Vec<u8>>,
}

impl<A: DurableActor> DurableSequencer<A> {
    /// Creates a sequencer, its handle, and the stream of encoded outbound
    /// frames the host must wire to the transport.
    pub fn new(
        actor: A,
        config: SequencerConfig,
    ) -> (Self, SequencerHandle, mpsc::Receiver<Vec<u8>>) {
        let (sender, inbox) = mpsc::channel(config.inbox_capacity);
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_capacity);
        let sequencer = Self {
            actor,
            lifecycle: Lifecycle::Recovering,
            cache: CallCache::default(),
            next_seq: 0,
            position: 0,
            log: config.log,
            checkpoints: config.checkpoints,
            policy: config.policy,
            meter: CheckpointMeter::new(),
            inbox,
            outbound,
        };
        (sequencer, SequencerHandle::new(sender), outbound_rx)
    }

    /// Recovers, then processes live requests until every handle is dropped.
    /// Returns the actor on clean shutdown so hosts can inspect final state.
    pub async fn run(mut self) -> Result<A, CoreError> {
        if let Err(e) = self.recover().await {
            error!(error = %e, "Recovery failed");
            return Err(e);
        }

        loop {
            // A due checkpoint wins over the next queued entry, even a ready
            // outcome.
            if self.meter.due(&self.policy) {
                if let Err(e) = self.take_checkpoint().await {
                    warn!(error = %e, "Policy checkpoint failed; previous image remains valid");
                    self.meter.reset();
                }
            }

            let request = match self.policy.every_interval {
                // Wake up at interval granularity so time-based checkpoints
                // fire even between messages.
                Some(interval) => {
                    match tokio::time::timeout(interval, self.inbox.recv()).await {
                        Ok(request) => request,
                        Err(_) => continue,
                    }
                }
                None => self.inbox.recv().await,
            };
            let Some(request) = request else { break };

            match request {
                SequencerRequest::Deliver { bytes } => self.on_deliver(bytes).await?,
                SequencerRequest::Checkpoint { respond_to } => {
                    let result = self.take_checkpoint().await;
                    let _ = respond_to.send(result);
                }
                SequencerRequest::Upgrade { state, respond_to } => {
                    let result = self.on_upgrade(&state).await;
                    let _ = respond_to.send(result);
                }
                SequencerRequest::Status { respond_to } => {
                    let _ = respond_to.send(Status {
                        lifecycle: self.lifecycle,
                        position: self.position,
                        pending_calls: self.cache.pending(),
                    });
                }
            }
        }

        info!(lifecycle = %self.lifecycle, position = self.position, "Sequencer shutdown");
        Ok(self.actor)
    }

    // -- startup ------------------------------------------------------------

    async fn recover(&mut self) -> Result<(), CoreError> {
        let latest = self
            .checkpoints
            .read_latest()
            .await
            .map_err(|e| CoreError::RecoveryFailed(format!("checkpoint store: {e}")))?;
        let had_checkpoint = latest.is_some();

        if let Some((bytes, position)) = latest {
            let image = CheckpointImage::decode(&bytes).map_err(|e| {
                CoreError::RecoveryFailed(format!("checkpoint at position {position}: {e}"))
            })?;
            if image.position != position {
                return Err(CoreError::RecoveryFailed(format!(
                    "checkpoint position mismatch: store says {position}, image says {}",
                    image.position
                )));
            }
            self.actor
                .on_restore_state(&image.state)
                .map_err(|e| CoreError::RecoveryFailed(format!("actor rejected state: {e}")))?;
            self.next_seq = image.next_seq;
            self.cache = CallCache::restore(&image.parked);
            self.position = image.position;
            info!(
                position = image.position,
                parked = image.parked.len(),
                "Restored checkpoint"
            );
        }

        let entries = self
            .log
            .read_from(self.position)
            .await
            .map_err(|e| CoreError::RecoveryFailed(format!("log read: {e}")))?;
        let replayed = entries.len();
        for (position, entry) in entries {
            self.apply_entry(&entry, true).await?;
            self.position = position + 1;
        }
        info!(replayed, position = self.position, "Replay complete");

        if !had_checkpoint && replayed == 0 {
            let entry = LogEntry::Lifecycle(LifecycleEvent::FirstStart);
            let position = self.log.append(&entry).await?;
            info!(position, "First start for this actor identity");
            self.apply_entry(&entry, false).await?;
            self.position = position + 1;
        }

        self.lifecycle.advance(Lifecycle::BecomingPrimary)?;
        let position = self
            .log
            .append(&LogEntry::Lifecycle(LifecycleEvent::BecamePrimary))
            .await?;
        self.position = position + 1;
        self.actor.on_becoming_primary();
        self.lifecycle.advance(Lifecycle::Primary)?;
        self.meter.reset();
        info!(position = self.position, "Primary");
        Ok(())
    }

    // -- live requests ------------------------------------------------------

    async fn on_deliver(&mut self, bytes: Vec<u8>) -> Result<(), CoreError> {
        let frame = match codec::decode(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, len = bytes.len(), "Dropping malformed frame");
                return Ok(());
            }
        };
        if !frame.kind.is_outcome() && !self.actor.handles(frame.method) {
            warn!(method = %frame.method, seq = %frame.seq, "Dropping frame for unhandled method");
            return Ok(());
        }

        // Logged before dispatch: replay must see exactly what we dispatched.
        let payload_len = frame.payload.len();
        let entry = LogEntry::Inbound(frame);
        let position = self.log.append(&entry).await?;
        self.meter.record(payload_len);
        let applied = self.apply_entry(&entry, false).await;
        self.position = position + 1;
        applied
    }

    async fn on_upgrade(&mut self, state: &[u8]) -> Result<(), CoreError> {
        self.lifecycle.advance(Lifecycle::Upgrading)?;
        info!("Upgrading");
        match self.actor.on_restore_state(state) {
            Ok(()) => {
                // The upgraded state is not derivable from the log, so it
                // must be checkpointed before anything else happens.
                let result = self.take_checkpoint().await.map(|_| ());
                self.lifecycle.advance(Lifecycle::Primary)?;
                result
            }
            Err(e) => {
                warn!(error = %e, "Actor rejected upgrade state");
                self.lifecycle.advance(Lifecycle::Primary)?;
                Err(CoreError::Upgrade(e.to_string()))
            }
        }
    }

    // -- dispatch -----------------------------------------------------------

    async fn apply_entry(&mut self, entry: &LogEntry, replaying: bool) -> Result<(), CoreError> {
        match entry {
            LogEntry::Lifecycle(LifecycleEvent::FirstStart) => {
                self.run_turn(Turn::FirstStart, None, replaying).await
            }
            LogEntry::Lifecycle(LifecycleEvent::BecamePrimary) => {
                debug!(replaying, "Recovery marker");
                Ok(())
            }
            LogEntry::Inbound(frame) => match frame.kind {
                CallKind::Blocking | CallKind::FireAndForget => {
                    let origin = (frame.kind == CallKind::Blocking).then_some(ReplyTo {
                        method: frame.method,
                        seq: frame.seq,
                    });
                    debug!(method = %frame.method, seq = %frame.seq, replaying, "Dispatching call");
                    self.run_turn(Turn::Call(frame), origin, replaying).await
                }
                CallKind::ReturnValue | CallKind::ExceptionReturn => {
                    let outcome = match frame.kind {
                        CallKind::ReturnValue => CallOutcome::Return(frame.payload.clone()),
                        _ => CallOutcome::Exception(frame.payload.clone()),
                    };
                    match self.cache.resolve(frame.seq) {
                        Resolved::Unknown => {
                            // Benign after a restart: the call was resolved
                            // before the last checkpoint.
                            warn!(seq = %frame.seq, "Outcome for untracked sequence number; ignoring");
                            Ok(())
                        }
                        Resolved::Issued => {
                            debug!(seq = %frame.seq, "Outcome for unawaited call; dropping");
                            Ok(())
                        }
                        Resolved::Parked { reply_to } => {
                            debug!(seq = %frame.seq, replaying, "Resuming continuation");
                            self.run_turn(Turn::Resume(frame.seq, outcome), reply_to, replaying)
                                .await
                        }
                    }
                }
            },
        }
    }

    /// Runs one actor turn and applies its effects: queued outbound frames,
    /// a reply or exception for the originating caller, or a parked
    /// continuation. Outputs are suppressed wholesale during replay.
    async fn run_turn(
        &mut self,
        turn: Turn<'_>,
        origin: Option<ReplyTo>,
        replaying: bool,
    ) -> Result<(), CoreError> {
        let mut ctx = TurnContext::new(replaying, &mut self.next_seq, &mut self.cache);
        let result = match turn {
            Turn::Call(frame) => self.actor.handle_call(frame, &mut ctx),
            Turn::Resume(awaited, outcome) => self.actor.resume(awaited, outcome, &mut ctx),
            Turn::FirstStart => self.actor.on_first_start(&mut ctx).map(|()| Step::Done),
        };
        let (mut outgoing, fatal) = ctx.into_effects();
        if let Some(e) = fatal {
            return Err(e.into());
        }

        match result {
            Ok(Step::Done) => {
                if let Some(to) = origin {
                    outgoing.push(reply_frame(to, CallKind::ReturnValue, Vec::new()));
                }
            }
            Ok(Step::Reply(bytes)) => match origin {
                Some(to) => outgoing.push(reply_frame(to, CallKind::ReturnValue, bytes)),
                None => debug!("Reply from a turn with no blocking caller; dropping"),
            },
            Ok(Step::AwaitCall(seq)) => {
                self.cache.park(seq, origin)?;
            }
            Err(fault) => {
                // Contained: a blocking caller gets the fault as an
                // exception outcome, fire-and-forget is logged and swallowed.
                warn!(error = %fault, "Handler fault");
                if let Some(to) = origin {
                    outgoing.push(reply_frame(
                        to,
                        CallKind::ExceptionReturn,
                        fault.to_string().into_bytes(),
                    ));
                }
            }
        }

        if !replaying {
            for frame in outgoing {
                if self.outbound.send(codec::encode(&frame)).await.is_err() {
                    warn!("Outbound channel closed; dropping frame");
                    break;
                }
            }
        }
        Ok(())
    }

    // -- checkpointing ------------------------------------------------------

    async fn take_checkpoint(&mut self) -> Result<u64, CoreError> {
        let state = self
            .actor
            .on_save_state()
            .map_err(|e| CoreError::Checkpoint(format!("actor save: {e}")))?;
        let image = CheckpointImage {
            state,
            position: self.position,
            next_seq: self.next_seq,
            parked: self.cache.markers(),
        };
        let parked = image.parked.len();
        let bytes = image.encode()?;
        self.checkpoints
            .write_checkpoint(bytes, image.position)
            .await?;
        if self.policy.truncate_log {
            self.log.truncate_before(image.position).await?;
        }
        self.meter.reset();
        info!(position = image.position, parked, "Checkpoint committed");
        Ok(image.position)
    }
}

fn reply_frame(to: ReplyTo, kind: CallKind, payload: Vec<u8>) -> CallFrame {
    CallFrame {
        method: to.method,
        kind,
        seq: to.seq,
        payload,
    }
}
