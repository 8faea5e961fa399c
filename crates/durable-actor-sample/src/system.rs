//! # Bank Wiring
//!
//! Builds the two-actor bank: a teller sequencer, an auditor sequencer, and
//! the frame pumps between them. The teller's outbound calls flow into the
//! auditor's inbox, the auditor's outcome frames flow back into the teller's,
//! and outcomes addressed to the external caller surface through [`Bank`]'s
//! typed client methods.
//!
//! Durability lives in the [`BankStores`] handed to [`Bank::start`]; start a
//! second bank on the same stores and it recovers exactly where the first one
//! stopped.

use crate::auditor::Auditor;
use crate::teller::Teller;
use crate::wire::{
    self, BalanceRequest, DepositRequest, TransferReceipt, TransferRequest, WireError,
};
use durable_actor::codec;
use durable_actor::{
    CallFrame, CallKind, CheckpointStore, CoreError, DurableSequencer, LogStore,
    MemoryCheckpoints, MemoryLog, MethodId, SeqNo, SequencerConfig, SequencerHandle,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;

/// Durable storage for one actor identity.
#[derive(Clone)]
pub struct BankStores {
    pub log: Arc<dyn LogStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
}

impl BankStores {
    pub fn new(log: Arc<dyn LogStore>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self { log, checkpoints }
    }

    /// Volatile stores; clone before starting so a later [`Bank::start`] on
    /// the clone simulates a restart of the same identity.
    pub fn in_memory() -> Self {
        Self {
            log: Arc::new(MemoryLog::new()),
            checkpoints: Arc::new(MemoryCheckpoints::new()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BankError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The teller turned the request down; carries the exception text.
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("bank is no longer running")]
    Disconnected,
}

/// A running bank and the typed client surface over its teller.
pub struct Bank {
    teller: SequencerHandle,
    auditor: SequencerHandle,
    replies: mpsc::Receiver<CallFrame>,
    next_seq: u64,
    stop: watch::Sender<bool>,
    pumps: Vec<JoinHandle<()>>,
    teller_task: JoinHandle<Result<Teller, CoreError>>,
    auditor_task: JoinHandle<Result<Auditor, CoreError>>,
}

impl Bank {
    /// Spawns both sequencers and the pumps between them. Recovery runs
    /// before either actor accepts traffic.
    pub fn start(teller_stores: BankStores, auditor_stores: BankStores, audit_limit: i64) -> Self {
        let teller_config = SequencerConfig::new(teller_stores.log, teller_stores.checkpoints);
        let (teller_seq, teller, mut teller_out) =
            DurableSequencer::new(Teller::new(), teller_config);

        let auditor_config = SequencerConfig::new(auditor_stores.log, auditor_stores.checkpoints);
        let (auditor_seq, auditor, mut auditor_out) =
            DurableSequencer::new(Auditor::new(audit_limit), auditor_config);

        let teller_task = tokio::spawn(teller_seq.run());
        let auditor_task = tokio::spawn(auditor_seq.run());

        let (reply_tx, replies) = mpsc::channel(32);
        let (stop, _) = watch::channel(false);

        // Teller outbound: calls go to the auditor, outcomes go to the caller.
        let mut stop_rx = stop.subscribe();
        let to_auditor = auditor.clone();
        let teller_pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    received = teller_out.recv() => {
                        let Some(bytes) = received else { break };
                        let frame = match codec::decode(&bytes) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(error = %e, "Unroutable teller frame");
                                continue;
                            }
                        };
                        let routed = if frame.kind.is_outcome() {
                            reply_tx.send(frame).await.is_ok()
                        } else {
                            to_auditor.deliver(bytes).await.is_ok()
                        };
                        if !routed {
                            break;
                        }
                    }
                }
            }
        });

        // Auditor outbound: verdicts are outcome frames for the teller.
        let mut stop_rx = stop.subscribe();
        let to_teller = teller.clone();
        let auditor_pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    received = auditor_out.recv() => {
                        let Some(bytes) = received else { break };
                        if to_teller.deliver(bytes).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            teller,
            auditor,
            replies,
            next_seq: 0,
            stop,
            pumps: vec![teller_pump, auditor_pump],
            teller_task,
            auditor_task,
        }
    }

    pub async fn deposit(&mut self, account: &str, amount: i64) -> Result<i64, BankError> {
        let payload = wire::encode(&DepositRequest {
            account: account.to_string(),
            amount,
        })?;
        let reply = self.call(wire::DEPOSIT, payload).await?;
        Ok(wire::decode(&reply)?)
    }

    pub async fn balance(&mut self, account: &str) -> Result<i64, BankError> {
        let payload = wire::encode(&BalanceRequest {
            account: account.to_string(),
        })?;
        let reply = self.call(wire::BALANCE, payload).await?;
        Ok(wire::decode(&reply)?)
    }

    pub async fn transfer(
        &mut self,
        from: &str,
        to: &str,
        amount: i64,
    ) -> Result<TransferReceipt, BankError> {
        let payload = wire::encode(&TransferRequest {
            from: from.to_string(),
            to: to.to_string(),
            amount,
        })?;
        let reply = self.call(wire::TRANSFER, payload).await?;
        Ok(wire::decode(&reply)?)
    }

    /// Checkpoints both actors; returns the teller's checkpoint position.
    pub async fn checkpoint(&self) -> Result<u64, BankError> {
        self.auditor.checkpoint().await?;
        Ok(self.teller.checkpoint().await?)
    }

    /// Stops the pumps, shuts both sequencers down, and returns the final
    /// actors for inspection.
    pub async fn shutdown(self) -> Result<(Teller, Auditor), BankError> {
        let _ = self.stop.send(true);
        for pump in self.pumps {
            let _ = pump.await;
        }
        drop(self.teller);
        drop(self.auditor);
        let teller = self
            .teller_task
            .await
            .map_err(|_| BankError::Disconnected)??;
        let auditor = self
            .auditor_task
            .await
            .map_err(|_| BankError::Disconnected)??;
        Ok((teller, auditor))
    }

    /// One blocking call against the teller: deliver the frame, wait for the
    /// outcome carrying our sequence number.
    async fn call(&mut self, method: MethodId, payload: Vec<u8>) -> Result<Vec<u8>, BankError> {
        self.next_seq += 1;
        let seq = SeqNo(self.next_seq);
        let frame = CallFrame {
            method,
            kind: CallKind::Blocking,
            seq,
            payload,
        };
        self.teller.deliver(codec::encode(&frame)).await?;

        loop {
            let reply = self.replies.recv().await.ok_or(BankError::Disconnected)?;
            if reply.seq != seq {
                // Stale outcome for an abandoned call; clients here are
                // sequential, so skip it.
                continue;
            }
            return match reply.kind {
                CallKind::ExceptionReturn => Err(BankError::Rejected(
                    String::from_utf8_lossy(&reply.payload).into_owned(),
                )),
                _ => Ok(reply.payload),
            };
        }
    }
}
