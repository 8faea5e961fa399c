//! # Auditor Actor
//!
//! Signs off on transfers. A single-turn actor: every audit request gets an
//! immediate verdict, so the auditor never parks and never issues calls of
//! its own. It still counts durably; the review tally survives restarts the
//! same way the teller's accounts do.

use crate::wire::{self, AuditRequest, AuditVerdict, MethodTable};
use durable_actor::{CallFrame, CallOutcome, DurableActor, MethodId, SeqNo, Step, TurnContext};
use serde::{Deserialize, Serialize};
use tracing::info;

static TABLE: MethodTable<Auditor> = MethodTable::new(&[(wire::AUDIT, Auditor::on_audit)]);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditorState {
    /// Largest single transfer the auditor will approve.
    pub limit: i64,
    pub reviewed: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuditorError {
    #[error(transparent)]
    Wire(#[from] wire::WireError),
    #[error("unexpected outcome for {0}; auditor issues no calls")]
    UnexpectedOutcome(SeqNo),
    #[error("auditor state error: {0}")]
    State(String),
}

pub struct Auditor {
    state: AuditorState,
}

impl Auditor {
    pub fn new(limit: i64) -> Self {
        Self {
            state: AuditorState { limit, reviewed: 0 },
        }
    }

    pub fn state(&self) -> &AuditorState {
        &self.state
    }

    fn on_audit(
        &mut self,
        frame: &CallFrame,
        _ctx: &mut TurnContext<'_>,
    ) -> Result<Step, AuditorError> {
        let request: AuditRequest = wire::decode(&frame.payload)?;
        self.state.reviewed += 1;

        let verdict = if request.from == request.to {
            AuditVerdict {
                approved: false,
                reason: format!("transfer from {:?} to itself", request.from),
            }
        } else if request.amount > self.state.limit {
            AuditVerdict {
                approved: false,
                reason: format!(
                    "amount {} exceeds audit limit {}",
                    request.amount, self.state.limit
                ),
            }
        } else {
            AuditVerdict {
                approved: true,
                reason: String::new(),
            }
        };
        info!(
            from = %request.from,
            to = %request.to,
            amount = request.amount,
            approved = verdict.approved,
            "Audit verdict"
        );
        Ok(Step::Reply(wire::encode(&verdict)?))
    }
}

impl DurableActor for Auditor {
    type Fault = AuditorError;

    fn handles(&self, method: MethodId) -> bool {
        TABLE.handles(method)
    }

    fn on_save_state(&self) -> Result<Vec<u8>, AuditorError> {
        bincode::serialize(&self.state).map_err(|e| AuditorError::State(e.to_string()))
    }

    fn on_restore_state(&mut self, bytes: &[u8]) -> Result<(), AuditorError> {
        self.state =
            bincode::deserialize(bytes).map_err(|e| AuditorError::State(e.to_string()))?;
        Ok(())
    }

    fn handle_call(
        &mut self,
        frame: &CallFrame,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Step, AuditorError> {
        match TABLE.dispatch(self, frame, ctx) {
            Some(result) => result,
            None => Err(AuditorError::State(format!(
                "no handler for {}",
                frame.method
            ))),
        }
    }

    fn resume(
        &mut self,
        awaited: SeqNo,
        _outcome: CallOutcome,
        _ctx: &mut TurnContext<'_>,
    ) -> Result<Step, AuditorError> {
        Err(AuditorError::UnexpectedOutcome(awaited))
    }
}
