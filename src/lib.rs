//! Anchor Witness Library
//!
//! Collects witness proofs for anchor events, decides when enough witnesses
//! have attested an event, and publishes the event with the collected proofs
//! merged into its credential, at most once per anchor event.
//!
//! ## Modules
//!
//! - [`domain`] - Witnesses, statuses, proof payloads and anchor events
//! - [`infra`] - Collaborator traits, errors, stores (in-memory, PostgreSQL) and retry
//! - [`policy`] - Batch/system threshold witness policy
//! - [`witness`] - Proof handler and transport delivery
//! - [`metrics`] - Counters and latency histograms
//! - [`telemetry`] - Logging, OpenTelemetry tracing and context propagation
//! - [`config`] - Environment configuration

pub mod config;
pub mod domain;
pub mod infra;
pub mod metrics;
pub mod policy;
pub mod telemetry;
pub mod witness;

// Re-export commonly used types
pub use domain::{
    AnchorCredential, AnchorEvent, FinalizedAnchorEvent, ProofEnvelope, Witness, WitnessProof,
    WitnessStatus, WitnessType, WitnessUri,
};

pub use infra::{
    AnchorEventStore, MonitoringService, ProofStore, Publisher, Result, Stage, StatusStore,
    WitnessError, WitnessPolicy,
};

pub use config::WitnessConfig;
pub use policy::ThresholdPolicy;
pub use witness::{ProofDelivery, ProofMessage, WitnessProofHandler, WitnessProviders};
