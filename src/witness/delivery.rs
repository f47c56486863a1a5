//! Delivery of witness proofs from a message transport
//!
//! Proofs arrive as [`ProofMessage`]s. Each delivery runs
//! [`WitnessProofHandler::handle_proof`], retrying failures classified as
//! transient, and reports whether the transport should ack the message or
//! route it to a dead letter queue.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn, Instrument};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

use crate::domain::{bytes_base64, WitnessUri};
use crate::infra::{Result, Retry, RetryConfig, WitnessError};
use crate::metrics::metric_names;
use crate::telemetry::{current_context, extract_context, inject_context, spans};

use super::WitnessProofHandler;

/// A witness proof as carried by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofMessage {
    #[serde(default = "Uuid::new_v4")]
    pub message_id: Uuid,
    pub witness: WitnessUri,
    pub anchor_event_id: String,
    pub expiry_time: DateTime<Utc>,
    #[serde(with = "bytes_base64")]
    pub proof: Vec<u8>,
    /// Trace context and other transport headers
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl ProofMessage {
    pub fn new(
        witness: WitnessUri,
        anchor_event_id: impl Into<String>,
        expiry_time: DateTime<Utc>,
        proof: Vec<u8>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            witness,
            anchor_event_id: anchor_event_id.into(),
            expiry_time,
            proof,
            metadata: HashMap::new(),
        }
    }

    /// Attach the current span's trace context
    pub fn with_trace_context(mut self) -> Self {
        inject_context(&mut self.metadata, &current_context());
        self
    }

    pub fn from_json(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// What the transport should do with a message
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// Handled (including no-op outcomes); ack the message
    Accepted { attempts: u32 },
    /// Permanent failure or retries exhausted; dead-letter the message
    Rejected { attempts: u32, error: WitnessError },
}

impl DeliveryOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DeliveryOutcome::Accepted { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Accepted { attempts } | DeliveryOutcome::Rejected { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Totals from [`ProofDelivery::run`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub accepted: u64,
    pub rejected: u64,
}

/// Feeds transport messages into a [`WitnessProofHandler`]
pub struct ProofDelivery {
    handler: Arc<WitnessProofHandler>,
    retry: Retry,
}

impl ProofDelivery {
    pub fn new(handler: Arc<WitnessProofHandler>, retry: RetryConfig) -> Self {
        Self {
            handler,
            retry: Retry::new(retry),
        }
    }

    /// Deliver one message, continuing the sender's trace if it carried one
    pub async fn deliver(&self, message: &ProofMessage) -> DeliveryOutcome {
        let span = tracing::info_span!(
            spans::DELIVER_PROOF,
            message_id = %message.message_id,
            anchor_event_id = %message.anchor_event_id,
            witness = %message.witness,
        );
        span.set_parent(extract_context(&message.metadata));

        self.deliver_with_retry(message).instrument(span).await
    }

    /// Decode and deliver a raw transport payload
    pub async fn deliver_raw(&self, payload: &[u8]) -> DeliveryOutcome {
        match ProofMessage::from_json(payload) {
            Ok(message) => self.deliver(&message).await,
            Err(error) => {
                self.handler
                    .metrics()
                    .inc_counter(metric_names::DELIVERIES_REJECTED)
                    .await;
                warn!(error = %error, "Undecodable proof message");
                DeliveryOutcome::Rejected { attempts: 0, error }
            }
        }
    }

    /// Deliver messages until every sender is dropped
    pub async fn run(&self, mut rx: mpsc::Receiver<ProofMessage>) -> DeliveryStats {
        let mut stats = DeliveryStats::default();

        while let Some(message) = rx.recv().await {
            if self.deliver(&message).await.is_accepted() {
                stats.accepted += 1;
            } else {
                stats.rejected += 1;
            }
        }

        info!(
            accepted = stats.accepted,
            rejected = stats.rejected,
            "Proof channel closed, delivery stopped"
        );
        stats
    }

    async fn deliver_with_retry(&self, message: &ProofMessage) -> DeliveryOutcome {
        let handler = &self.handler;
        let witness = &message.witness;
        let anchor_event_id = message.anchor_event_id.as_str();
        let expiry_time = message.expiry_time;
        let proof = message.proof.as_slice();

        let outcome = self
            .retry
            .run_with_predicate(
                "deliver witness proof",
                move || handler.handle_proof(witness, anchor_event_id, expiry_time, proof),
                WitnessError::is_transient,
            )
            .await;

        let metrics = self.handler.metrics();
        if outcome.attempts > 1 {
            metrics
                .add_counter(
                    metric_names::DELIVERIES_RETRIED,
                    u64::from(outcome.attempts - 1),
                )
                .await;
        }

        match outcome.result {
            Ok(()) => DeliveryOutcome::Accepted {
                attempts: outcome.attempts,
            },
            Err(error) => {
                metrics.inc_counter(metric_names::DELIVERIES_REJECTED).await;
                warn!(
                    attempts = outcome.attempts,
                    transient = error.is_transient(),
                    error = %error,
                    "Rejecting witness proof message"
                );
                DeliveryOutcome::Rejected {
                    attempts: outcome.attempts,
                    error,
                }
            }
        }
    }
}
