//! Core type definitions for witness coordination
//!
//! Witness identities, witness kinds, per-anchor-event status and the proof
//! records kept in the proof store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::infra::WitnessError;

/// Serde module for serializing opaque bytes as standard base64 strings
pub mod bytes_base64 {
    use base64::Engine;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Serde module for optional base64 bytes
pub mod option_bytes_base64 {
    use base64::Engine;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(opt: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match opt {
            Some(bytes) => serializer
                .serialize_some(&base64::engine::general_purpose::STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(s) => base64::engine::general_purpose::STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Witness identity (the witness service's actor URI)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WitnessUri(String);

impl WitnessUri {
    /// Create a witness URI, rejecting empty or whitespace-only input
    pub fn new(uri: impl Into<String>) -> Result<Self, WitnessError> {
        let uri = uri.into();
        if uri.trim().is_empty() {
            return Err(WitnessError::InvalidWitness("empty witness URI".into()));
        }
        Ok(Self(uri))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for WitnessUri {
    type Err = WitnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for WitnessUri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WitnessUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of witness asked to attest an anchor event
///
/// Batch witnesses are chosen per batch of operations; system witnesses are
/// configured for the whole deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WitnessType {
    Batch,
    System,
}

impl WitnessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WitnessType::Batch => "batch",
            WitnessType::System => "system",
        }
    }
}

impl FromStr for WitnessType {
    type Err = WitnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "batch" => Ok(WitnessType::Batch),
            "system" => Ok(WitnessType::System),
            other => Err(WitnessError::InvalidWitness(format!(
                "unknown witness type: {other}"
            ))),
        }
    }
}

impl fmt::Display for WitnessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Witnessing progress of an anchor event
///
/// `InProcess` -> `Completed` is the only transition; `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WitnessStatus {
    InProcess,
    Completed,
}

impl WitnessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WitnessStatus::InProcess => "in-process",
            WitnessStatus::Completed => "completed",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, WitnessStatus::Completed)
    }

    /// Whether moving from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: WitnessStatus) -> bool {
        !(self.is_completed() && next == WitnessStatus::InProcess)
    }
}

impl FromStr for WitnessStatus {
    type Err = WitnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in-process" => Ok(WitnessStatus::InProcess),
            "completed" => Ok(WitnessStatus::Completed),
            other => Err(WitnessError::Internal(format!(
                "unknown witness status: {other}"
            ))),
        }
    }
}

impl fmt::Display for WitnessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A witness registered for an anchor event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    /// Batch or system witness
    #[serde(rename = "type")]
    pub witness_type: WitnessType,
    /// Witness identity
    pub uri: WitnessUri,
}

impl Witness {
    pub fn new(witness_type: WitnessType, uri: WitnessUri) -> Self {
        Self { witness_type, uri }
    }

    pub fn batch(uri: WitnessUri) -> Self {
        Self::new(WitnessType::Batch, uri)
    }

    pub fn system(uri: WitnessUri) -> Self {
        Self::new(WitnessType::System, uri)
    }
}

/// Proof-store entry for one (anchor event, witness) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessProof {
    #[serde(flatten)]
    pub witness: Witness,
    /// Raw proof bytes as submitted; `None` until the witness responds
    #[serde(default, with = "option_bytes_base64")]
    pub proof: Option<Vec<u8>>,
}

impl WitnessProof {
    /// Entry for a registered witness that has not submitted a proof yet
    pub fn pending(witness: Witness) -> Self {
        Self {
            witness,
            proof: None,
        }
    }

    pub fn has_proof(&self) -> bool {
        self.proof.is_some()
    }

    pub fn uri(&self) -> &WitnessUri {
        &self.witness.uri
    }

    pub fn witness_type(&self) -> WitnessType {
        self.witness.witness_type
    }
}
