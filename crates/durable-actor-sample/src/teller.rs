//! # Teller Actor
//!
//! Holds the bank accounts. Deposits and balance reads complete in one turn;
//! a transfer issues a blocking audit call to the auditor and parks until the
//! verdict comes back, so a transfer in flight survives a checkpoint and a
//! restart of the teller process.
//!
//! The in-flight transfer requests live in [`TellerState::pending`], keyed by
//! the audit call's sequence number. They are part of the durable state for
//! the same reason the sequencer checkpoints its parked continuations: after
//! a crash the resumed turn needs the original request, not just the verdict.

use crate::wire::{
    self, AuditRequest, AuditVerdict, BalanceRequest, DepositRequest, MethodTable,
    TransferReceipt, TransferRequest,
};
use durable_actor::{CallFrame, CallOutcome, DurableActor, MethodId, SeqNo, Step, TurnContext};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

static TABLE: MethodTable<Teller> = MethodTable::new(&[
    (wire::DEPOSIT, Teller::on_deposit),
    (wire::BALANCE, Teller::on_balance),
    (wire::TRANSFER, Teller::on_transfer),
]);

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TellerState {
    pub accounts: BTreeMap<String, i64>,
    /// Transfers awaiting an audit verdict, keyed by audit call sequence.
    pub pending: BTreeMap<u64, TransferRequest>,
}

#[derive(Debug, thiserror::Error)]
pub enum TellerError {
    #[error(transparent)]
    Wire(#[from] wire::WireError),
    #[error("unknown account {0:?}")]
    UnknownAccount(String),
    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),
    #[error("account {account:?} holds {available}, transfer needs {requested}")]
    InsufficientFunds {
        account: String,
        requested: i64,
        available: i64,
    },
    #[error("audit denied: {0}")]
    AuditDenied(String),
    #[error("audit failed: {0}")]
    AuditFailed(String),
    #[error("teller state error: {0}")]
    State(String),
}

#[derive(Default)]
pub struct Teller {
    state: TellerState,
}

impl Teller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &TellerState {
        &self.state
    }

    fn on_deposit(
        &mut self,
        frame: &CallFrame,
        _ctx: &mut TurnContext<'_>,
    ) -> Result<Step, TellerError> {
        let request: DepositRequest = wire::decode(&frame.payload)?;
        if request.amount <= 0 {
            return Err(TellerError::InvalidAmount(request.amount));
        }
        let balance = self.state.accounts.entry(request.account).or_insert(0);
        *balance += request.amount;
        Ok(Step::Reply(wire::encode(&*balance)?))
    }

    fn on_balance(
        &mut self,
        frame: &CallFrame,
        _ctx: &mut TurnContext<'_>,
    ) -> Result<Step, TellerError> {
        let request: BalanceRequest = wire::decode(&frame.payload)?;
        let balance = self
            .state
            .accounts
            .get(&request.account)
            .ok_or(TellerError::UnknownAccount(request.account))?;
        Ok(Step::Reply(wire::encode(balance)?))
    }

    fn on_transfer(
        &mut self,
        frame: &CallFrame,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Step, TellerError> {
        let request: TransferRequest = wire::decode(&frame.payload)?;
        if request.amount <= 0 {
            return Err(TellerError::InvalidAmount(request.amount));
        }
        self.check_funds(&request)?;
        if !self.state.accounts.contains_key(&request.to) {
            return Err(TellerError::UnknownAccount(request.to));
        }

        let audit = AuditRequest {
            from: request.from.clone(),
            to: request.to.clone(),
            amount: request.amount,
        };
        let seq = ctx.call(wire::AUDIT, wire::encode(&audit)?);
        self.state.pending.insert(seq.0, request);
        Ok(Step::AwaitCall(seq))
    }

    /// Funds are checked when the transfer is accepted and again when the
    /// verdict arrives; other turns may have drained the account in between.
    fn check_funds(&self, request: &TransferRequest) -> Result<(), TellerError> {
        let available = *self
            .state
            .accounts
            .get(&request.from)
            .ok_or_else(|| TellerError::UnknownAccount(request.from.clone()))?;
        if available < request.amount {
            return Err(TellerError::InsufficientFunds {
                account: request.from.clone(),
                requested: request.amount,
                available,
            });
        }
        Ok(())
    }
}

impl DurableActor for Teller {
    type Fault = TellerError;

    fn handles(&self, method: MethodId) -> bool {
        TABLE.handles(method)
    }

    fn on_first_start(&mut self, _ctx: &mut TurnContext<'_>) -> Result<(), TellerError> {
        // The reserve account exists from the very first turn and, because
        // first start is replayed, after every restart as well.
        self.state.accounts.insert("reserve".to_string(), 1_000);
        Ok(())
    }

    fn on_becoming_primary(&mut self) {
        info!(
            accounts = self.state.accounts.len(),
            pending = self.state.pending.len(),
            "Teller open for business"
        );
    }

    fn on_save_state(&self) -> Result<Vec<u8>, TellerError> {
        bincode::serialize(&self.state).map_err(|e| TellerError::State(e.to_string()))
    }

    fn on_restore_state(&mut self, bytes: &[u8]) -> Result<(), TellerError> {
        self.state = bincode::deserialize(bytes).map_err(|e| TellerError::State(e.to_string()))?;
        Ok(())
    }

    fn handle_call(
        &mut self,
        frame: &CallFrame,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Step, TellerError> {
        match TABLE.dispatch(self, frame, ctx) {
            Some(result) => result,
            None => Err(TellerError::State(format!(
                "no handler for {}",
                frame.method
            ))),
        }
    }

    fn resume(
        &mut self,
        awaited: SeqNo,
        outcome: CallOutcome,
        _ctx: &mut TurnContext<'_>,
    ) -> Result<Step, TellerError> {
        let request = self
            .state
            .pending
            .remove(&awaited.0)
            .ok_or_else(|| TellerError::State(format!("no pending transfer for {awaited}")))?;

        let verdict: AuditVerdict = match outcome {
            CallOutcome::Return(bytes) => wire::decode(&bytes)?,
            CallOutcome::Exception(bytes) => {
                return Err(TellerError::AuditFailed(
                    String::from_utf8_lossy(&bytes).into_owned(),
                ));
            }
        };
        if !verdict.approved {
            return Err(TellerError::AuditDenied(verdict.reason));
        }

        self.check_funds(&request)?;
        let from_balance = {
            let balance = self
                .state
                .accounts
                .get_mut(&request.from)
                .ok_or_else(|| TellerError::UnknownAccount(request.from.clone()))?;
            *balance -= request.amount;
            *balance
        };
        let to_balance = {
            let balance = self
                .state
                .accounts
                .get_mut(&request.to)
                .ok_or_else(|| TellerError::UnknownAccount(request.to.clone()))?;
            *balance += request.amount;
            *balance
        };
        info!(
            from = %request.from,
            to = %request.to,
            amount = request.amount,
            "Transfer settled"
        );
        Ok(Step::Reply(wire::encode(&TransferReceipt {
            from_balance,
            to_balance,
        })?))
    }
}
