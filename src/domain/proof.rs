//! Witness proof payloads
//!
//! A witness answers an anchor event with a JSON document carrying a `proof`
//! object. Only `created` and `domain` are interpreted here; every other field
//! belongs to the proof suite and is kept verbatim so it can be merged into the
//! finalized credential unchanged.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::infra::{Result, WitnessError};

/// Fields every witness proof must carry
#[derive(Debug, Clone, Deserialize)]
struct RequiredProofFields {
    created: DateTime<Utc>,
    domain: String,
}

/// Parsed witness proof document
#[derive(Debug, Clone, PartialEq)]
pub struct ProofEnvelope {
    created: DateTime<Utc>,
    domain: String,
    proof: Map<String, Value>,
}

impl ProofEnvelope {
    /// Parse raw proof bytes.
    ///
    /// Fails with [`WitnessError::MalformedProof`] when the document is not a
    /// JSON object, has no `proof` object, or the proof lacks a valid RFC 3339
    /// `created` or a string `domain`.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let document: Value = serde_json::from_slice(raw)
            .map_err(|e| WitnessError::MalformedProof(format!("invalid JSON: {e}")))?;

        let proof = match document {
            Value::Object(mut fields) => match fields.remove("proof") {
                Some(Value::Object(proof)) => proof,
                Some(_) => {
                    return Err(WitnessError::MalformedProof(
                        "proof is not an object".into(),
                    ))
                }
                None => return Err(WitnessError::MalformedProof("missing proof".into())),
            },
            _ => {
                return Err(WitnessError::MalformedProof(
                    "document is not an object".into(),
                ))
            }
        };

        let required: RequiredProofFields = serde_json::from_value(Value::Object(proof.clone()))
            .map_err(|e| WitnessError::MalformedProof(e.to_string()))?;

        Ok(Self {
            created: required.created,
            domain: required.domain,
            proof,
        })
    }

    /// When the witness created the proof
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Domain the proof is bound to (the witness's log, if any)
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The `proof` object exactly as submitted
    pub fn proof(&self) -> &Map<String, Value> {
        &self.proof
    }

    pub fn into_proof_value(self) -> Value {
        Value::Object(self.proof)
    }
}

/// SHA-256 of raw proof bytes, used to tell identical resubmissions from
/// conflicting ones.
pub fn proof_digest(raw: &[u8]) -> [u8; 32] {
    Sha256::digest(raw).into()
}
