//! # Durable Bank Sample
//!
//! A two-actor bank built on the durable-actor core: a [`teller::Teller`]
//! holding accounts and an [`auditor::Auditor`] signing off on transfers.
//! A transfer parks the teller on a blocking audit call, so the sample
//! exercises the full continuation path, including checkpoints taken while a
//! transfer is in flight and restarts that recover it.

pub mod auditor;
pub mod system;
pub mod teller;
pub mod wire;
