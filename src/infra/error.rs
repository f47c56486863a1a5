//! Error types for witness-proof coordination

use std::fmt;

use thiserror::Error;

use super::retry::is_retryable_db_error;

/// Step of proof handling an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Register,
    StatusLookup,
    ParseProof,
    AnchorEventLookup,
    StoreProof,
    Monitoring,
    ProofLookup,
    PolicyEvaluation,
    MergeProofs,
    StatusUpdate,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Register => "register",
            Stage::StatusLookup => "status lookup",
            Stage::ParseProof => "parse proof",
            Stage::AnchorEventLookup => "anchor event lookup",
            Stage::StoreProof => "store proof",
            Stage::Monitoring => "monitoring watch",
            Stage::ProofLookup => "proof lookup",
            Stage::PolicyEvaluation => "policy evaluation",
            Stage::MergeProofs => "merge proofs",
            Stage::StatusUpdate => "status update",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while coordinating witness proofs
#[derive(Error, Debug)]
pub enum WitnessError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No status was registered for the anchor event
    #[error("status not found for anchor event {0}")]
    StatusNotFound(String),

    /// Anchor event not found
    #[error("anchor event not found: {0}")]
    AnchorEventNotFound(String),

    /// Witness was never registered for the anchor event
    #[error("witness {witness} not found for anchor event {anchor_event_id}")]
    WitnessNotFound {
        anchor_event_id: String,
        witness: String,
    },

    /// Witness already submitted a different proof
    #[error("conflicting proof from witness {witness} for anchor event {anchor_event_id}")]
    ConflictingProof {
        anchor_event_id: String,
        witness: String,
    },

    /// Proof payload could not be parsed
    #[error("malformed proof: {0}")]
    MalformedProof(String),

    /// Invalid witness identity or type
    #[error("invalid witness: {0}")]
    InvalidWitness(String),

    /// Invalid state transition
    #[error("invalid status transition for anchor event {anchor_event_id}: {from} -> {to}")]
    InvalidStatusTransition {
        anchor_event_id: String,
        from: String,
        to: String,
    },

    /// Witness policy could not be evaluated
    #[error("policy error: {0}")]
    Policy(String),

    /// Monitoring watch could not be registered
    #[error("monitoring error: {0}")]
    Monitoring(String),

    /// Finalized anchor event could not be published
    #[error("publish error: {0}")]
    Publish(String),

    /// Failure that is expected to clear on redelivery
    #[error("transient error: {0}")]
    Transient(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),

    /// Error raised while handling a specific anchor event
    #[error("{stage} failed for anchor event {anchor_event_id}: {source}")]
    Stage {
        anchor_event_id: String,
        stage: Stage,
        #[source]
        source: Box<WitnessError>,
    },
}

impl WitnessError {
    /// Attach the anchor event and stage to this error
    pub fn in_stage(self, anchor_event_id: &str, stage: Stage) -> Self {
        WitnessError::Stage {
            anchor_event_id: anchor_event_id.to_string(),
            stage,
            source: Box::new(self),
        }
    }

    /// The error without any stage context
    pub fn root(&self) -> &WitnessError {
        match self {
            WitnessError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stage the error was raised in, if known
    pub fn stage(&self) -> Option<Stage> {
        match self {
            WitnessError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether redelivering the same message may succeed
    pub fn is_transient(&self) -> bool {
        match self.root() {
            WitnessError::Database(e) => is_retryable_db_error(e),
            WitnessError::Transient(_) => true,
            _ => false,
        }
    }
}

/// Result type for witness operations
pub type Result<T> = std::result::Result<T, WitnessError>;
