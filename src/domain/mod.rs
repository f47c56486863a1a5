//! Domain models for anchor witnessing
//!
//! Witness identities and statuses, proof payloads, and anchor events with
//! their finalized (proof-bearing) form.

mod anchor_event;
mod proof;
mod types;

pub use anchor_event::*;
pub use proof::*;
pub use types::*;
