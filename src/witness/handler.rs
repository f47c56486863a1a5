//! Witness proof handler
//!
//! Runs the per-anchor-event state machine `InProcess -> Completed`. Every
//! call re-reads the persisted proof set, so proofs may arrive in any order
//! and from any replica. Completion goes through the status store's
//! compare-and-set: of several calls that see the policy satisfied at the
//! same time, exactly one flips the status and publishes.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::config::WitnessConfig;

use crate::domain::{
    proof_digest, AnchorEvent, FinalizedAnchorEvent, ProofEnvelope, Witness, WitnessStatus,
    WitnessUri,
};
use crate::infra::{
    postgres, AnchorEventStore, ChannelPublisher, MemoryAnchorEventStore, MemoryProofStore,
    MemoryStatusStore, MonitoringService, PgAnchorEventStore, PgProofStore, PgStatusStore,
    ProofStore, Publisher, Result, Stage, StatusStore, WitnessError, WitnessPolicy,
};
use crate::metrics::{metric_names, MetricsRegistry};

/// Collaborators the handler coordinates
#[derive(Clone)]
pub struct WitnessProviders {
    pub anchor_events: Arc<dyn AnchorEventStore>,
    pub proofs: Arc<dyn ProofStore>,
    pub statuses: Arc<dyn StatusStore>,
    pub policy: Arc<dyn WitnessPolicy>,
    pub monitoring: Arc<dyn MonitoringService>,
    pub publisher: Arc<dyn Publisher>,
}

impl WitnessProviders {
    /// Wire stores, policy and publisher from configuration.
    ///
    /// PostgreSQL stores over one pool of `max_connections` when
    /// `database_url` is set, empty memory stores otherwise. The returned
    /// receiver is fed by a publish channel of `publish_buffer` slots.
    pub async fn from_config(
        config: &WitnessConfig,
        monitoring: Arc<dyn MonitoringService>,
    ) -> Result<(Self, mpsc::Receiver<FinalizedAnchorEvent>)> {
        let (anchor_events, proofs, statuses): (
            Arc<dyn AnchorEventStore>,
            Arc<dyn ProofStore>,
            Arc<dyn StatusStore>,
        ) = match config.database_url.as_deref() {
            Some(url) => {
                let pool = postgres::connect(url, config.max_connections).await?;
                info!(
                    max_connections = config.max_connections,
                    "Using PostgreSQL witness stores"
                );
                (
                    Arc::new(PgAnchorEventStore::new(pool.clone())),
                    Arc::new(PgProofStore::new(pool.clone())),
                    Arc::new(PgStatusStore::new(pool)),
                )
            }
            None => {
                info!("No database configured, using in-memory witness stores");
                (
                    Arc::new(MemoryAnchorEventStore::new()),
                    Arc::new(MemoryProofStore::new()),
                    Arc::new(MemoryStatusStore::new()),
                )
            }
        };

        let (publisher, published) = ChannelPublisher::new(config.publish_buffer);

        let providers = Self {
            anchor_events,
            proofs,
            statuses,
            policy: Arc::new(config.policy()),
            monitoring,
            publisher: Arc::new(publisher),
        };
        Ok((providers, published))
    }
}

/// What a single proof did to its anchor event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProofOutcome {
    AfterCompletion,
    Expired,
    Pending,
    AlreadyCompleted,
    LostRace,
    Finalized,
}

/// Stateless coordinator for inbound witness proofs
pub struct WitnessProofHandler {
    providers: WitnessProviders,
    metrics: Arc<MetricsRegistry>,
}

impl WitnessProofHandler {
    pub fn new(providers: WitnessProviders) -> Self {
        Self {
            providers,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    /// Record metrics into a shared registry
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Register an anchor event for witnessing.
    ///
    /// Records the witnesses asked to attest it and marks it in process. Must
    /// complete before any proof for the anchor event is handled.
    #[instrument(
        skip(self, witnesses),
        fields(anchor_event_id = %anchor_event_id, witnesses = witnesses.len())
    )]
    pub async fn register(&self, anchor_event_id: &str, witnesses: Vec<Witness>) -> Result<()> {
        match self.providers.statuses.get_status(anchor_event_id).await {
            Ok(WitnessStatus::Completed) => {
                return Err(WitnessError::InvalidStatusTransition {
                    anchor_event_id: anchor_event_id.to_string(),
                    from: WitnessStatus::Completed.to_string(),
                    to: WitnessStatus::InProcess.to_string(),
                }
                .in_stage(anchor_event_id, Stage::Register));
            }
            Ok(WitnessStatus::InProcess) | Err(WitnessError::StatusNotFound(_)) => {}
            Err(e) => return Err(e.in_stage(anchor_event_id, Stage::Register)),
        }

        // Witnesses go in before the status: a proof is only accepted once
        // the status exists, and by then its witness must be known.
        self.providers
            .proofs
            .put(anchor_event_id, witnesses)
            .await
            .map_err(|e| e.in_stage(anchor_event_id, Stage::Register))?;

        self.providers
            .statuses
            .add_status(anchor_event_id, WitnessStatus::InProcess)
            .await
            .map_err(|e| e.in_stage(anchor_event_id, Stage::Register))?;

        info!("Registered anchor event for witnessing");
        Ok(())
    }

    /// Handle a proof submitted by `witness` for an anchor event.
    ///
    /// Returns `Ok(())` without side effects when the anchor event is already
    /// completed or `expiry_time` has passed. Any other failure is returned
    /// with the anchor event and stage attached; retrying is up to the caller.
    #[instrument(skip(self, proof), fields(anchor_event_id = %anchor_event_id, witness = %witness))]
    pub async fn handle_proof(
        &self,
        witness: &WitnessUri,
        anchor_event_id: &str,
        expiry_time: DateTime<Utc>,
        proof: &[u8],
    ) -> Result<()> {
        let start = Instant::now();
        self.metrics.inc_counter(metric_names::PROOFS_RECEIVED).await;

        let result = self
            .process_proof(witness, anchor_event_id, expiry_time, proof)
            .await;

        self.metrics
            .observe_histogram(metric_names::HANDLE_LATENCY, start.elapsed().as_secs_f64())
            .await;

        match result {
            Ok(outcome) => {
                self.record(outcome).await;
                Ok(())
            }
            Err(e) => {
                self.metrics.inc_counter(metric_names::PROOFS_FAILED).await;
                warn!(error = %e, stage = ?e.stage(), "Failed to handle witness proof");
                Err(e)
            }
        }
    }

    async fn process_proof(
        &self,
        witness: &WitnessUri,
        anchor_event_id: &str,
        expiry_time: DateTime<Utc>,
        proof: &[u8],
    ) -> Result<ProofOutcome> {
        let status = self
            .providers
            .statuses
            .get_status(anchor_event_id)
            .await
            .map_err(|e| e.in_stage(anchor_event_id, Stage::StatusLookup))?;

        if status.is_completed() {
            debug!("Anchor event already completed, ignoring proof");
            return Ok(ProofOutcome::AfterCompletion);
        }

        if Utc::now() > expiry_time {
            info!(%expiry_time, "Witness proof arrived after expiry, ignoring");
            return Ok(ProofOutcome::Expired);
        }

        let envelope = ProofEnvelope::parse(proof)
            .map_err(|e| e.in_stage(anchor_event_id, Stage::ParseProof))?;

        let anchor_event = self
            .providers
            .anchor_events
            .get(anchor_event_id)
            .await
            .map_err(|e| e.in_stage(anchor_event_id, Stage::AnchorEventLookup))?;

        self.providers
            .proofs
            .add_proof(anchor_event_id, witness, proof)
            .await
            .map_err(|e| e.in_stage(anchor_event_id, Stage::StoreProof))?;

        debug!(
            created = %envelope.created(),
            domain = envelope.domain(),
            digest = %hex::encode(proof_digest(proof)),
            "Stored witness proof"
        );

        self.providers
            .monitoring
            .watch(
                &anchor_event,
                expiry_time,
                envelope.domain(),
                envelope.created(),
            )
            .await
            .map_err(|e| e.in_stage(anchor_event_id, Stage::Monitoring))?;

        self.evaluate_policy(anchor_event_id, &anchor_event).await
    }

    /// Evaluate the policy over the persisted proofs and finalize if satisfied
    async fn evaluate_policy(
        &self,
        anchor_event_id: &str,
        anchor_event: &AnchorEvent,
    ) -> Result<ProofOutcome> {
        let proofs = self
            .providers
            .proofs
            .get(anchor_event_id)
            .await
            .map_err(|e| e.in_stage(anchor_event_id, Stage::ProofLookup))?;

        let satisfied = self
            .providers
            .policy
            .evaluate(&proofs)
            .await
            .map_err(|e| e.in_stage(anchor_event_id, Stage::PolicyEvaluation))?;

        if !satisfied {
            debug!(
                collected = proofs.iter().filter(|p| p.has_proof()).count(),
                registered = proofs.len(),
                "Witness policy not satisfied yet"
            );
            return Ok(ProofOutcome::Pending);
        }

        let finalized = FinalizedAnchorEvent::merge(anchor_event, &proofs)
            .map_err(|e| e.in_stage(anchor_event_id, Stage::MergeProofs))?;

        let status = self
            .providers
            .statuses
            .get_status(anchor_event_id)
            .await
            .map_err(|e| e.in_stage(anchor_event_id, Stage::StatusLookup))?;

        if status.is_completed() {
            debug!("Anchor event completed by another handler");
            return Ok(ProofOutcome::AlreadyCompleted);
        }

        let won = self
            .providers
            .statuses
            .set_status_if(
                anchor_event_id,
                WitnessStatus::InProcess,
                WitnessStatus::Completed,
            )
            .await
            .map_err(|e| e.in_stage(anchor_event_id, Stage::StatusUpdate))?;

        if !won {
            info!("Another handler finalized the anchor event first");
            return Ok(ProofOutcome::LostRace);
        }

        self.providers
            .publisher
            .publish(&finalized)
            .await
            .map_err(|e| e.in_stage(anchor_event_id, Stage::Publish))?;

        info!(
            witnesses = finalized.witnesses.len(),
            proofs = finalized.proofs().len(),
            "Anchor event witnessed and published"
        );

        Ok(ProofOutcome::Finalized)
    }

    async fn record(&self, outcome: ProofOutcome) {
        let name = match outcome {
            ProofOutcome::AfterCompletion => metric_names::PROOFS_AFTER_COMPLETION,
            ProofOutcome::Expired => metric_names::PROOFS_EXPIRED,
            ProofOutcome::Pending | ProofOutcome::AlreadyCompleted => {
                metric_names::PROOFS_ACCEPTED
            }
            ProofOutcome::LostRace => {
                self.metrics.inc_counter(metric_names::PROOFS_ACCEPTED).await;
                metric_names::FINALIZE_RACES_LOST
            }
            ProofOutcome::Finalized => {
                self.metrics.inc_counter(metric_names::PROOFS_ACCEPTED).await;
                metric_names::ANCHORS_FINALIZED
            }
        };
        self.metrics.inc_counter(name).await;
    }
}
