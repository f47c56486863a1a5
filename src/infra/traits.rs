//! Collaborator traits for the witness-proof handler
//!
//! The handler is a stateless coordinator: every piece of state it reasons
//! about lives behind one of these traits. Implementations must be safe to
//! share between concurrent handler calls and, for the two stores,
//! linearizable per anchor event ID.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use crate::domain::{
    AnchorEvent, FinalizedAnchorEvent, Witness, WitnessProof, WitnessStatus, WitnessUri,
};

use super::Result;

/// Read access to stored anchor events
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AnchorEventStore: Send + Sync {
    /// Get an anchor event by its index (content address)
    async fn get(&self, index: &str) -> Result<AnchorEvent>;
}

/// Per-anchor-event witness proofs keyed by witness URI
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProofStore: Send + Sync {
    /// Register the witnesses asked to attest an anchor event.
    ///
    /// Already registered witnesses are left untouched.
    async fn put(&self, anchor_event_id: &str, witnesses: Vec<Witness>) -> Result<()>;

    /// Record a witness proof.
    ///
    /// The first proof from a witness wins: resubmitting identical bytes is a
    /// no-op, different bytes fail with `ConflictingProof`. Unregistered
    /// witnesses fail with `WitnessNotFound`.
    async fn add_proof(
        &self,
        anchor_event_id: &str,
        witness: &WitnessUri,
        proof: &[u8],
    ) -> Result<()>;

    /// All registered witnesses for the anchor event with their proofs, in
    /// registration order
    async fn get(&self, anchor_event_id: &str) -> Result<Vec<WitnessProof>>;
}

/// Witnessing status per anchor event
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Write a status. Moving a completed anchor event back to in-process
    /// fails with `InvalidStatusTransition`.
    async fn add_status(&self, anchor_event_id: &str, status: WitnessStatus) -> Result<()>;

    /// Current status; `StatusNotFound` if the anchor event was never registered
    async fn get_status(&self, anchor_event_id: &str) -> Result<WitnessStatus>;

    /// Atomically replace `expected` with `new`.
    ///
    /// Returns `false` without writing when the current status differs from
    /// `expected`; `StatusNotFound` if there is no status at all.
    async fn set_status_if(
        &self,
        anchor_event_id: &str,
        expected: WitnessStatus,
        new: WitnessStatus,
    ) -> Result<bool>;
}

/// Decides whether enough witnesses have attested
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WitnessPolicy: Send + Sync {
    /// Evaluate the full current set of witness entries. Must not depend on
    /// their order.
    async fn evaluate(&self, proofs: &[WitnessProof]) -> Result<bool>;
}

/// Out-of-band confirmation that a witness actually logged its proof
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MonitoringService: Send + Sync {
    /// Start watching for the proof's inclusion until `end_time`
    async fn watch(
        &self,
        anchor_event: &AnchorEvent,
        end_time: DateTime<Utc>,
        domain: &str,
        created: DateTime<Utc>,
    ) -> Result<()>;
}

/// Outbound channel for finalized anchor events
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, finalized: &FinalizedAnchorEvent) -> Result<()>;
}
