//! Anchor events and their finalized form
//!
//! An anchor event is stored once and never mutated. Finalizing copies its
//! credential and attaches the collected witness proofs to the copy.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::{ProofEnvelope, WitnessProof, WitnessUri};
use crate::infra::{Result, WitnessError};

/// Accept either a single proof object or an array of them
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(single) => Ok(vec![single]),
    }
}

/// Credential attesting the anchor; witness proofs are appended to `proof`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorCredential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub proof: Vec<Value>,

    /// Everything else in the credential, untouched
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl AnchorCredential {
    pub fn new(id: Option<String>, body: Map<String, Value>) -> Self {
        Self {
            id,
            proof: Vec::new(),
            body,
        }
    }
}

/// An anchored batch of operations awaiting witness attestation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorEvent {
    /// Content address of the anchor event
    pub index: String,
    pub credential: AnchorCredential,
}

impl AnchorEvent {
    pub fn new(index: impl Into<String>, credential: AnchorCredential) -> Self {
        Self {
            index: index.into(),
            credential,
        }
    }
}

/// Anchor event with witness proofs merged into its credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedAnchorEvent {
    pub anchor_event: AnchorEvent,
    /// Witnesses whose proofs were merged, in merge order. A witness whose
    /// proof object equals one already in the credential is listed here but
    /// adds no second copy to `credential.proof`.
    pub witnesses: Vec<WitnessUri>,
    pub finalized_at: DateTime<Utc>,
}

impl FinalizedAnchorEvent {
    /// Merge collected proofs into a copy of the anchor credential.
    ///
    /// Entries without a proof are skipped. Each witness contributes at most
    /// one proof, and a proof object already present in the credential is not
    /// added again, so `proofs()` may hold fewer witness proofs than
    /// `witnesses` has entries. Stored proofs that no longer parse are an
    /// error.
    pub fn merge(anchor_event: &AnchorEvent, proofs: &[WitnessProof]) -> Result<Self> {
        let mut finalized = anchor_event.clone();
        let mut seen: HashSet<&WitnessUri> = HashSet::new();
        let mut witnesses = Vec::new();

        for entry in proofs {
            let Some(raw) = entry.proof.as_deref() else {
                continue;
            };
            if !seen.insert(entry.uri()) {
                continue;
            }

            let proof = ProofEnvelope::parse(raw)
                .map_err(|e| match e {
                    WitnessError::MalformedProof(msg) => WitnessError::MalformedProof(format!(
                        "stored proof from {}: {msg}",
                        entry.uri()
                    )),
                    other => other,
                })?
                .into_proof_value();

            if !finalized.credential.proof.contains(&proof) {
                finalized.credential.proof.push(proof);
            }
            witnesses.push(entry.uri().clone());
        }

        Ok(Self {
            anchor_event: finalized,
            witnesses,
            finalized_at: Utc::now(),
        })
    }

    pub fn index(&self) -> &str {
        &self.anchor_event.index
    }

    pub fn proofs(&self) -> &[Value] {
        &self.anchor_event.credential.proof
    }
}
