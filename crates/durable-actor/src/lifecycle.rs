//! # Actor Lifecycle
//!
//! Governs which parts of the core are active at any moment. Every sequencer
//! starts in `Recovering` and only accepts or emits live traffic once it is
//! `Primary`. `Upgrading` is entered from `Primary` when a new state version
//! is adopted and returns to `Primary` once it is checkpointed.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Replaying the durable log with outputs suppressed.
    Recovering,
    /// Replay finished; firing the becoming-primary hook before the first
    /// live input is accepted.
    BecomingPrimary,
    /// Accepting and emitting live traffic.
    Primary,
    /// Adopting a replacement state image.
    Upgrading,
}

impl Lifecycle {
    /// Legal transitions form a single path with an optional upgrade loop:
    /// `Recovering → BecomingPrimary → Primary ⇄ Upgrading`.
    pub fn can_transition(self, next: Lifecycle) -> bool {
        matches!(
            (self, next),
            (Lifecycle::Recovering, Lifecycle::BecomingPrimary)
                | (Lifecycle::BecomingPrimary, Lifecycle::Primary)
                | (Lifecycle::Primary, Lifecycle::Upgrading)
                | (Lifecycle::Upgrading, Lifecycle::Primary)
        )
    }

    /// Moves to `next`, rejecting illegal transitions. An illegal transition
    /// is a programming error in the sequencer, not an input problem.
    pub fn advance(&mut self, next: Lifecycle) -> Result<(), LifecycleError> {
        if !self.can_transition(next) {
            return Err(LifecycleError::IllegalTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    pub fn is_primary(self) -> bool {
        self == Lifecycle::Primary
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Recovering => "recovering",
            Lifecycle::BecomingPrimary => "becoming-primary",
            Lifecycle::Primary => "primary",
            Lifecycle::Upgrading => "upgrading",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("illegal lifecycle transition {from} -> {to}")]
    IllegalTransition { from: Lifecycle, to: Lifecycle },
}
