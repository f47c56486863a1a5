//! Witness proof coordination
//!
//! [`WitnessProofHandler`] turns individual witness proofs into at most one
//! published, proof-bearing anchor event. [`ProofDelivery`] adapts it to a
//! message transport with retries for transient failures.

pub mod delivery;
mod handler;

pub use delivery::{DeliveryOutcome, DeliveryStats, ProofDelivery, ProofMessage};
pub use handler::{WitnessProofHandler, WitnessProviders};
