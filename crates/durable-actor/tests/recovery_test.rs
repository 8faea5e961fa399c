//! Crash-restart behavior: replay determinism, checkpoint handoff,
//! continuations that span a restart, and recovery failure modes.

use durable_actor::codec;
use durable_actor::{
    CallFrame, CallKind, CallOutcome, CheckpointPolicy, CheckpointStore, CoreError, DurableActor,
    DurableSequencer, FileCheckpoints, FileLog, LogStore, MemoryCheckpoints, MemoryLog, MethodId,
    SeqNo, SequencerConfig, SequencerHandle, Step, TurnContext,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

// --- Test actor ---

const ADD: u32 = 1; // blocking: payload u64 LE amount, replies running total
const ASK: u32 = 3; // blocking: relays payload to remote method 9, replies with the outcome
const REMOTE: u32 = 9;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct TallyState {
    total: u64,
    resumed: Vec<u64>,
}

#[derive(Debug, thiserror::Error)]
#[error("tally fault: {0}")]
struct TallyFault(String);

/// The hook counters are deliberately not part of the serialized state, so
/// they show exactly what ran in this process lifetime.
#[derive(Default)]
struct TallyActor {
    state: TallyState,
    first_starts: usize,
    became_primary: usize,
}

impl DurableActor for TallyActor {
    type Fault = TallyFault;

    fn handles(&self, method: MethodId) -> bool {
        matches!(method.0, ADD | ASK)
    }

    fn on_first_start(&mut self, _ctx: &mut TurnContext<'_>) -> Result<(), TallyFault> {
        self.first_starts += 1;
        self.state.total = 100; // seed state that must survive via replay
        Ok(())
    }

    fn on_becoming_primary(&mut self) {
        self.became_primary += 1;
    }

    fn on_save_state(&self) -> Result<Vec<u8>, TallyFault> {
        bincode::serialize(&self.state).map_err(|e| TallyFault(e.to_string()))
    }

    fn on_restore_state(&mut self, bytes: &[u8]) -> Result<(), TallyFault> {
        self.state = bincode::deserialize(bytes).map_err(|e| TallyFault(e.to_string()))?;
        Ok(())
    }

    fn handle_call(
        &mut self,
        frame: &CallFrame,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Step, TallyFault> {
        match frame.method.0 {
            ADD => {
                let bytes: [u8; 8] = frame
                    .payload
                    .as_slice()
                    .try_into()
                    .map_err(|_| TallyFault("amount must be 8 bytes".into()))?;
                self.state.total += u64::from_le_bytes(bytes);
                Ok(Step::Reply(self.state.total.to_le_bytes().to_vec()))
            }
            ASK => {
                let seq = ctx.call(MethodId(REMOTE), frame.payload.clone());
                Ok(Step::AwaitCall(seq))
            }
            other => Err(TallyFault(format!("unexpected method {other}"))),
        }
    }

    fn resume(
        &mut self,
        awaited: SeqNo,
        outcome: CallOutcome,
        _ctx: &mut TurnContext<'_>,
    ) -> Result<Step, TallyFault> {
        self.state.resumed.push(awaited.0);
        match outcome {
            CallOutcome::Return(bytes) => Ok(Step::Reply(bytes)),
            CallOutcome::Exception(bytes) => Err(TallyFault(
                String::from_utf8_lossy(&bytes).into_owned(),
            )),
        }
    }
}

// --- Helpers ---

fn frame(method: u32, kind: CallKind, seq: u64, payload: Vec<u8>) -> Vec<u8> {
    codec::encode(&CallFrame {
        method: MethodId(method),
        kind,
        seq: SeqNo(seq),
        payload,
    })
}

fn add(seq: u64, amount: u64) -> Vec<u8> {
    frame(ADD, CallKind::Blocking, seq, amount.to_le_bytes().to_vec())
}

async fn next_frame(outbound: &mut mpsc::Receiver<Vec<u8>>) -> CallFrame {
    let bytes = outbound.recv().await.expect("outbound frame");
    codec::decode(&bytes).expect("well-formed outbound frame")
}

fn start(
    log: Arc<dyn LogStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    policy: CheckpointPolicy,
) -> (
    SequencerHandle,
    mpsc::Receiver<Vec<u8>>,
    tokio::task::JoinHandle<Result<TallyActor, CoreError>>,
) {
    let config = SequencerConfig::new(log, checkpoints).with_policy(policy);
    let (sequencer, handle, outbound) = DurableSequencer::new(TallyActor::default(), config);
    let running = tokio::spawn(sequencer.run());
    (handle, outbound, running)
}

async fn shutdown(
    handle: SequencerHandle,
    running: tokio::task::JoinHandle<Result<TallyActor, CoreError>>,
) -> TallyActor {
    drop(handle);
    running.await.unwrap().unwrap()
}

// --- Tests ---

#[tokio::test]
async fn replay_rebuilds_identical_state() {
    let log: Arc<dyn LogStore> = Arc::new(MemoryLog::new());
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpoints::new());

    let (handle, mut outbound, running) =
        start(log.clone(), checkpoints.clone(), CheckpointPolicy::disabled());
    handle.deliver(add(1, 3)).await.unwrap();
    handle.deliver(add(2, 4)).await.unwrap();
    next_frame(&mut outbound).await;
    next_frame(&mut outbound).await;
    let first_run = shutdown(handle, running).await;
    assert_eq!(first_run.state.total, 107); // 100 seeded at first start

    // Two further restarts, no traffic. Replay alone must reproduce the
    // exact state bytes every time.
    let reference = first_run.on_save_state().unwrap();
    for _ in 0..2 {
        let (handle, _outbound, running) =
            start(log.clone(), checkpoints.clone(), CheckpointPolicy::disabled());
        let recovered = shutdown(handle, running).await;
        assert_eq!(recovered.on_save_state().unwrap(), reference);
    }
}

#[tokio::test]
async fn replay_emits_nothing() {
    let log: Arc<dyn LogStore> = Arc::new(MemoryLog::new());
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpoints::new());

    let (handle, mut outbound, running) =
        start(log.clone(), checkpoints.clone(), CheckpointPolicy::disabled());
    handle.deliver(add(1, 5)).await.unwrap();
    next_frame(&mut outbound).await;
    shutdown(handle, running).await;

    // Replay re-applies the ADD but must not re-send its reply; the only
    // frame the restarted instance emits is the reply to the new live ADD.
    let (handle, mut outbound, running) =
        start(log.clone(), checkpoints.clone(), CheckpointPolicy::disabled());
    handle.deliver(add(2, 1)).await.unwrap();
    let reply = next_frame(&mut outbound).await;
    assert_eq!(reply.seq, SeqNo(2));
    assert_eq!(reply.payload, 106u64.to_le_bytes().to_vec());
    shutdown(handle, running).await;
}

#[tokio::test]
async fn checkpoint_then_replay_covers_the_tail() {
    let log: Arc<dyn LogStore> = Arc::new(MemoryLog::new());
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpoints::new());

    let (handle, mut outbound, running) =
        start(log.clone(), checkpoints.clone(), CheckpointPolicy::disabled());
    handle.deliver(add(1, 1)).await.unwrap();
    next_frame(&mut outbound).await;
    let position = handle.checkpoint().await.unwrap();
    assert!(position > 0);
    handle.deliver(add(2, 2)).await.unwrap();
    next_frame(&mut outbound).await;
    shutdown(handle, running).await;

    // Recovery restores the image, then replays only the ADD past it.
    let (handle, _outbound, running) =
        start(log.clone(), checkpoints.clone(), CheckpointPolicy::disabled());
    let recovered = shutdown(handle, running).await;
    assert_eq!(recovered.state.total, 103);
    assert_eq!(recovered.first_starts, 0); // first start is behind the checkpoint
}

#[tokio::test]
async fn continuation_survives_a_restart() {
    let log: Arc<dyn LogStore> = Arc::new(MemoryLog::new());
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpoints::new());

    let (handle, mut outbound, running) =
        start(log.clone(), checkpoints.clone(), CheckpointPolicy::disabled());
    handle
        .deliver(frame(ASK, CallKind::Blocking, 50, b"pending question".to_vec()))
        .await
        .unwrap();
    let outgoing = next_frame(&mut outbound).await;
    assert_eq!(outgoing.method, MethodId(REMOTE));
    // Checkpoint while the outbound call is still in flight, then crash.
    handle.checkpoint().await.unwrap();
    let before = shutdown(handle, running).await;
    assert!(before.state.resumed.is_empty());

    // The restarted instance picks the parked continuation up from the
    // checkpoint and resumes it when the outcome finally arrives.
    let (handle, mut outbound, running) =
        start(log.clone(), checkpoints.clone(), CheckpointPolicy::disabled());
    let status = handle.status().await.unwrap();
    assert_eq!(status.pending_calls, 1);

    handle
        .deliver(frame(
            REMOTE,
            CallKind::ReturnValue,
            outgoing.seq.0,
            b"late answer".to_vec(),
        ))
        .await
        .unwrap();
    let reply = next_frame(&mut outbound).await;
    assert_eq!(reply.kind, CallKind::ReturnValue);
    assert_eq!(reply.seq, SeqNo(50));
    assert_eq!(reply.payload, b"late answer".to_vec());

    // The same outcome after yet another restart is a no-op.
    shutdown(handle, running).await;
    let (handle, mut outbound, running) =
        start(log.clone(), checkpoints.clone(), CheckpointPolicy::disabled());
    handle
        .deliver(frame(
            REMOTE,
            CallKind::ReturnValue,
            outgoing.seq.0,
            b"duplicate".to_vec(),
        ))
        .await
        .unwrap();
    handle.deliver(add(51, 1)).await.unwrap();
    let next = next_frame(&mut outbound).await;
    assert_eq!(next.seq, SeqNo(51), "resolved outcome must emit no frame");
    let after = shutdown(handle, running).await;
    assert_eq!(after.state.resumed, vec![outgoing.seq.0]);
}

#[tokio::test]
async fn hooks_follow_replay_semantics() {
    let log: Arc<dyn LogStore> = Arc::new(MemoryLog::new());
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpoints::new());

    let (handle, _outbound, running) =
        start(log.clone(), checkpoints.clone(), CheckpointPolicy::disabled());
    let fresh = shutdown(handle, running).await;
    assert_eq!(fresh.first_starts, 1);
    assert_eq!(fresh.became_primary, 1);

    // On restart the first-start hook runs again via replay of its log
    // entry; becoming-primary fires fresh, once per recovery.
    let (handle, _outbound, running) =
        start(log.clone(), checkpoints.clone(), CheckpointPolicy::disabled());
    let restarted = shutdown(handle, running).await;
    assert_eq!(restarted.first_starts, 1);
    assert_eq!(restarted.became_primary, 1);
    assert_eq!(restarted.state.total, 100);
}

#[tokio::test]
async fn corrupt_latest_checkpoint_is_fatal() {
    let log: Arc<dyn LogStore> = Arc::new(MemoryLog::new());
    let checkpoints = Arc::new(MemoryCheckpoints::new());

    let (handle, mut outbound, running) = start(
        log.clone(),
        checkpoints.clone(),
        CheckpointPolicy::disabled(),
    );
    handle.deliver(add(1, 1)).await.unwrap();
    next_frame(&mut outbound).await;
    handle.checkpoint().await.unwrap();
    shutdown(handle, running).await;

    // A newer, unreadable image must stop recovery outright. Falling back
    // to the older valid image would silently lose acknowledged progress.
    checkpoints
        .write_checkpoint(b"garbage".to_vec(), 999)
        .await
        .unwrap();
    let config = SequencerConfig::new(log, checkpoints);
    let (sequencer, _handle, _outbound) = DurableSequencer::new(TallyActor::default(), config);
    let result = sequencer.run().await;
    assert!(matches!(result, Err(CoreError::RecoveryFailed(_))));
}

#[tokio::test]
async fn truncation_keeps_only_the_tail_and_recovery_still_works() {
    let log = Arc::new(MemoryLog::new());
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpoints::new());
    let truncating = CheckpointPolicy {
        truncate_log: true,
        ..CheckpointPolicy::disabled()
    };

    let (handle, mut outbound, running) =
        start(log.clone(), checkpoints.clone(), truncating.clone());
    handle.deliver(add(1, 1)).await.unwrap();
    next_frame(&mut outbound).await;
    let position = handle.checkpoint().await.unwrap();
    handle.deliver(add(2, 2)).await.unwrap();
    next_frame(&mut outbound).await;
    shutdown(handle, running).await;

    let remaining = log.read_from(0).await.unwrap();
    assert!(remaining.iter().all(|(p, _)| *p >= position));

    let (handle, _outbound, running) = start(log, checkpoints, truncating);
    let recovered = shutdown(handle, running).await;
    assert_eq!(recovered.state.total, 103);
}

#[tokio::test]
async fn upgrade_state_is_durable() {
    let log: Arc<dyn LogStore> = Arc::new(MemoryLog::new());
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpoints::new());

    let (handle, mut outbound, running) =
        start(log.clone(), checkpoints.clone(), CheckpointPolicy::disabled());
    let replacement = TallyState {
        total: 42,
        resumed: Vec::new(),
    };
    handle
        .upgrade(bincode::serialize(&replacement).unwrap())
        .await
        .unwrap();
    handle.deliver(add(1, 1)).await.unwrap();
    let reply = next_frame(&mut outbound).await;
    assert_eq!(reply.payload, 43u64.to_le_bytes().to_vec());
    shutdown(handle, running).await;

    // The upgrade checkpointed itself, so the replacement state is the
    // recovery baseline, not the pre-upgrade log.
    let (handle, _outbound, running) =
        start(log.clone(), checkpoints.clone(), CheckpointPolicy::disabled());
    let recovered = shutdown(handle, running).await;
    assert_eq!(recovered.state.total, 43);
}

#[tokio::test]
async fn rejected_upgrade_leaves_the_sequencer_primary() {
    let log: Arc<dyn LogStore> = Arc::new(MemoryLog::new());
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpoints::new());

    let (handle, mut outbound, running) =
        start(log, checkpoints, CheckpointPolicy::disabled());
    let result = handle.upgrade(b"not a tally state".to_vec()).await;
    assert!(matches!(result, Err(CoreError::Upgrade(_))));

    // Still serving traffic on the old state.
    handle.deliver(add(1, 1)).await.unwrap();
    let reply = next_frame(&mut outbound).await;
    assert_eq!(reply.payload, 101u64.to_le_bytes().to_vec());
    shutdown(handle, running).await;
}

#[tokio::test]
async fn file_backed_stores_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("actor.log");
    let ckpt_dir = dir.path().join("checkpoints");

    {
        let log: Arc<dyn LogStore> = Arc::new(FileLog::open(&log_path).unwrap());
        let checkpoints: Arc<dyn CheckpointStore> =
            Arc::new(FileCheckpoints::open(&ckpt_dir).unwrap());
        let (handle, mut outbound, running) =
            start(log, checkpoints, CheckpointPolicy::disabled());
        handle.deliver(add(1, 7)).await.unwrap();
        next_frame(&mut outbound).await;
        handle.checkpoint().await.unwrap();
        handle.deliver(add(2, 8)).await.unwrap();
        next_frame(&mut outbound).await;
        shutdown(handle, running).await;
    }

    let log: Arc<dyn LogStore> = Arc::new(FileLog::open(&log_path).unwrap());
    let checkpoints: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpoints::open(&ckpt_dir).unwrap());
    let (handle, _outbound, running) = start(log, checkpoints, CheckpointPolicy::disabled());
    let recovered = shutdown(handle, running).await;
    assert_eq!(recovered.state.total, 115);
}
