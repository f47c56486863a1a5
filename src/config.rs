//! Environment configuration

use std::str::FromStr;

use crate::infra::{Result, RetryConfig, WitnessError};
use crate::policy::{Operator, Threshold, ThresholdPolicy};

/// Witness service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WitnessConfig {
    /// PostgreSQL URL; memory stores are used when unset
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub batch_threshold: Threshold,
    pub system_threshold: Threshold,
    pub operator: Operator,
    /// Capacity of the finalized anchor event channel
    pub publish_buffer: usize,
    /// Redelivery attempts for transient failures
    pub delivery_max_retries: u32,
}

impl Default for WitnessConfig {
    fn default() -> Self {
        let policy = ThresholdPolicy::default();
        Self {
            database_url: None,
            max_connections: 10,
            batch_threshold: policy.batch,
            system_threshold: policy.system,
            operator: policy.operator,
            publish_buffer: 256,
            delivery_max_retries: 3,
        }
    }
}

impl WitnessConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            max_connections: parse_or(&lookup, "MAX_DB_CONNECTIONS", defaults.max_connections)?,
            batch_threshold: parse_or(&lookup, "WITNESS_POLICY_BATCH", defaults.batch_threshold)?,
            system_threshold: parse_or(
                &lookup,
                "WITNESS_POLICY_SYSTEM",
                defaults.system_threshold,
            )?,
            operator: parse_or(&lookup, "WITNESS_POLICY_OPERATOR", defaults.operator)?,
            publish_buffer: parse_or(&lookup, "PUBLISH_BUFFER", defaults.publish_buffer)?,
            delivery_max_retries: parse_or(
                &lookup,
                "DELIVERY_MAX_RETRIES",
                defaults.delivery_max_retries,
            )?,
        };

        if config.max_connections == 0 {
            return Err(WitnessError::Configuration(
                "MAX_DB_CONNECTIONS must be at least 1".into(),
            ));
        }
        // tokio::sync::mpsc::channel panics on zero capacity
        if config.publish_buffer == 0 {
            return Err(WitnessError::Configuration(
                "PUBLISH_BUFFER must be at least 1".into(),
            ));
        }

        Ok(config)
    }

    pub fn policy(&self) -> ThresholdPolicy {
        ThresholdPolicy::new(self.batch_threshold, self.system_threshold, self.operator)
    }

    pub fn delivery_retry(&self) -> RetryConfig {
        RetryConfig::delivery().with_max_retries(self.delivery_max_retries)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| WitnessError::Configuration(format!("invalid {key}: {raw}"))),
    }
}
