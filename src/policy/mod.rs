//! Threshold witness policy
//!
//! A structured policy: one threshold for batch witnesses, one for system
//! witnesses, combined with AND or OR. Only entries that carry a proof count
//! as collected. Under AND a witness type nobody was registered for is
//! satisfied; under OR it is left out and the populated type decides.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{WitnessProof, WitnessType};
use crate::infra::{Result, WitnessError, WitnessPolicy};

/// How many witnesses of one type must respond
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    /// At least this percentage (0-100) of the registered witnesses
    MinPercent(u8),
    /// At least this many, capped at the number registered
    OutOf(usize),
}

impl Threshold {
    /// Whether `collected` of `total` witnesses meets the threshold
    pub fn is_met(&self, collected: usize, total: usize) -> bool {
        if total == 0 {
            return true;
        }
        match *self {
            Threshold::MinPercent(percent) => collected * 100 >= usize::from(percent) * total,
            Threshold::OutOf(required) => collected >= required.min(total),
        }
    }
}

impl FromStr for Threshold {
    type Err = WitnessError;

    /// `"75%"` is a percentage, `"2"` a count
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || WitnessError::Configuration(format!("invalid witness threshold: {s}"));

        if let Some(percent) = s.strip_suffix('%') {
            let percent: u8 = percent.trim().parse().map_err(|_| invalid())?;
            if percent > 100 {
                return Err(invalid());
            }
            Ok(Threshold::MinPercent(percent))
        } else {
            s.parse().map(Threshold::OutOf).map_err(|_| invalid())
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::MinPercent(p) => write!(f, "{p}%"),
            Threshold::OutOf(n) => write!(f, "{n}"),
        }
    }
}

/// How the batch and system thresholds combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    And,
    Or,
}

impl FromStr for Operator {
    type Err = WitnessError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "and" => Ok(Operator::And),
            "or" => Ok(Operator::Or),
            other => Err(WitnessError::Configuration(format!(
                "invalid policy operator: {other}"
            ))),
        }
    }
}

/// Batch/system threshold policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    pub batch: Threshold,
    pub system: Threshold,
    pub operator: Operator,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            batch: Threshold::MinPercent(100),
            system: Threshold::MinPercent(100),
            operator: Operator::And,
        }
    }
}

impl ThresholdPolicy {
    pub fn new(batch: Threshold, system: Threshold, operator: Operator) -> Self {
        Self {
            batch,
            system,
            operator,
        }
    }

    fn tally(proofs: &[WitnessProof], witness_type: WitnessType) -> (usize, usize) {
        proofs
            .iter()
            .filter(|p| p.witness_type() == witness_type)
            .fold((0, 0), |(collected, total), p| {
                (collected + usize::from(p.has_proof()), total + 1)
            })
    }

    /// Synchronous evaluation, shared by the trait impl
    pub fn is_satisfied(&self, proofs: &[WitnessProof]) -> bool {
        let (batch_collected, batch_total) = Self::tally(proofs, WitnessType::Batch);
        let (system_collected, system_total) = Self::tally(proofs, WitnessType::System);

        let batch_ok = self.batch.is_met(batch_collected, batch_total);
        let system_ok = self.system.is_met(system_collected, system_total);

        match self.operator {
            Operator::And => batch_ok && system_ok,
            Operator::Or => match (batch_total, system_total) {
                (0, 0) => true,
                (0, _) => system_ok,
                (_, 0) => batch_ok,
                _ => batch_ok || system_ok,
            },
        }
    }
}

#[async_trait]
impl WitnessPolicy for ThresholdPolicy {
    async fn evaluate(&self, proofs: &[WitnessProof]) -> Result<bool> {
        let satisfied = self.is_satisfied(proofs);
        tracing::debug!(
            policy = ?self,
            entries = proofs.len(),
            satisfied,
            "Evaluated witness policy"
        );
        Ok(satisfied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Witness, WitnessUri};

    fn entry(witness_type: WitnessType, n: usize, with_proof: bool) -> WitnessProof {
        let uri = WitnessUri::new(format!("https://w{n}.example.com")).unwrap();
        WitnessProof {
            witness: Witness::new(witness_type, uri),
            proof: with_proof.then(|| b"{}".to_vec()),
        }
    }

    #[test]
    fn test_threshold_arithmetic() {
        assert!(Threshold::MinPercent(100).is_met(2, 2));
        assert!(!Threshold::MinPercent(100).is_met(1, 2));
        assert!(Threshold::MinPercent(50).is_met(1, 2));
        assert!(!Threshold::MinPercent(51).is_met(1, 2));
        assert!(Threshold::MinPercent(0).is_met(0, 3));
        assert!(Threshold::OutOf(2).is_met(2, 5));
        assert!(!Threshold::OutOf(2).is_met(1, 5));
        // capped at the number registered
        assert!(Threshold::OutOf(3).is_met(1, 1));
        // nothing registered
        assert!(Threshold::OutOf(3).is_met(0, 0));
    }

    #[test]
    fn test_threshold_parse() {
        assert_eq!("75%".parse::<Threshold>().unwrap(), Threshold::MinPercent(75));
        assert_eq!(" 2 ".parse::<Threshold>().unwrap(), Threshold::OutOf(2));
        assert!("101%".parse::<Threshold>().is_err());
        assert!("two".parse::<Threshold>().is_err());
        assert_eq!(Threshold::MinPercent(75).to_string(), "75%");
    }

    #[test]
    fn test_default_policy_requires_every_witness() {
        let policy = ThresholdPolicy::default();

        let partial = vec![
            entry(WitnessType::Batch, 1, true),
            entry(WitnessType::Batch, 2, false),
        ];
        assert!(!policy.is_satisfied(&partial));

        let complete = vec![
            entry(WitnessType::Batch, 1, true),
            entry(WitnessType::Batch, 2, true),
        ];
        assert!(policy.is_satisfied(&complete));
    }

    #[test]
    fn test_or_operator() {
        let policy = ThresholdPolicy::new(
            Threshold::MinPercent(100),
            Threshold::OutOf(1),
            Operator::Or,
        );

        let proofs = vec![
            entry(WitnessType::Batch, 1, false),
            entry(WitnessType::System, 2, true),
        ];
        assert!(policy.is_satisfied(&proofs));

        let and_policy = ThresholdPolicy {
            operator: Operator::And,
            ..policy
        };
        assert!(!and_policy.is_satisfied(&proofs));
    }

    #[test]
    fn test_or_ignores_unregistered_type() {
        let policy = ThresholdPolicy::new(
            Threshold::MinPercent(100),
            Threshold::OutOf(1),
            Operator::Or,
        );

        let batch_only = vec![
            entry(WitnessType::Batch, 1, true),
            entry(WitnessType::Batch, 2, false),
            entry(WitnessType::Batch, 3, false),
        ];
        assert!(!policy.is_satisfied(&batch_only));

        let all_batch: Vec<_> = (1..=3).map(|n| entry(WitnessType::Batch, n, true)).collect();
        assert!(policy.is_satisfied(&all_batch));

        let system_only = vec![
            entry(WitnessType::System, 1, false),
            entry(WitnessType::System, 2, true),
        ];
        assert!(policy.is_satisfied(&system_only));

        // AND still treats the missing type as satisfied
        let and_policy = ThresholdPolicy {
            operator: Operator::And,
            ..policy
        };
        assert!(policy.is_satisfied(&all_batch) && and_policy.is_satisfied(&all_batch));
        assert!(!and_policy.is_satisfied(&batch_only));
    }

    #[test]
    fn test_empty_proof_set_is_satisfied() {
        assert!(ThresholdPolicy::default().is_satisfied(&[]));
        let or_policy = ThresholdPolicy {
            operator: Operator::Or,
            ..ThresholdPolicy::default()
        };
        assert!(or_policy.is_satisfied(&[]));
    }

    #[tokio::test]
    async fn test_evaluate_matches_is_satisfied() {
        let policy = ThresholdPolicy::default();
        let proofs = vec![entry(WitnessType::System, 1, false)];
        assert!(!policy.evaluate(&proofs).await.unwrap());
    }
}
