//! # Bank Wire Format
//!
//! Method ids, payload structs, and the marshaling table shared by the bank
//! actors and their callers. In a generated-stub world this file would be the
//! output of interface tooling; here it is written by hand in the same shape:
//! each [`MethodTable`] entry pairs a method id with a closure that decodes
//! the payload, invokes the typed handler, and encodes the reply.

use durable_actor::{CallFrame, DurableActor, MethodId, Step, TurnContext};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// Teller methods.
pub const DEPOSIT: MethodId = MethodId(1);
pub const BALANCE: MethodId = MethodId(2);
pub const TRANSFER: MethodId = MethodId(3);

// Auditor methods.
pub const AUDIT: MethodId = MethodId(10);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepositRequest {
    pub account: String,
    pub amount: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BalanceRequest {
    pub account: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from: String,
    pub to: String,
    pub amount: i64,
}

/// What the teller asks the auditor to sign off on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRequest {
    pub from: String,
    pub to: String,
    pub amount: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditVerdict {
    pub approved: bool,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub from_balance: i64,
    pub to_balance: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed payload: {0}")]
    Malformed(String),
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    bincode::serialize(value).map_err(|e| WireError::Malformed(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    bincode::deserialize(bytes).map_err(|e| WireError::Malformed(e.to_string()))
}

/// One marshaling entry: decode the frame payload, invoke the actor, encode
/// the reply into the returned [`Step`].
pub type Handler<A> =
    fn(&mut A, &CallFrame, &mut TurnContext<'_>) -> Result<Step, <A as DurableActor>::Fault>;

/// Static method-id dispatch table for one actor type.
pub struct MethodTable<A: DurableActor> {
    entries: &'static [(MethodId, Handler<A>)],
}

impl<A: DurableActor> MethodTable<A> {
    pub const fn new(entries: &'static [(MethodId, Handler<A>)]) -> Self {
        Self { entries }
    }

    pub fn handles(&self, method: MethodId) -> bool {
        self.entries.iter().any(|(id, _)| *id == method)
    }

    /// Dispatches the frame to its handler, or `None` for an unknown method.
    /// The sequencer's method probe makes `None` unreachable in practice.
    pub fn dispatch(
        &self,
        actor: &mut A,
        frame: &CallFrame,
        ctx: &mut TurnContext<'_>,
    ) -> Option<Result<Step, A::Fault>> {
        self.entries
            .iter()
            .find(|(id, _)| *id == frame.method)
            .map(|(_, handler)| handler(actor, frame, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads_roundtrip() {
        let request = TransferRequest {
            from: "alice".into(),
            to: "bob".into(),
            amount: 250,
        };
        let decoded: TransferRequest = decode(&encode(&request).unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        let bytes = encode(&BalanceRequest {
            account: "alice".into(),
        })
        .unwrap();
        assert!(decode::<TransferRequest>(&bytes).is_err());
    }
}
