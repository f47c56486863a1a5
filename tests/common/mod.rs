//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::sync::mpsc;

use anchor_witness::domain::{
    AnchorCredential, AnchorEvent, FinalizedAnchorEvent, Witness, WitnessUri,
};
use anchor_witness::infra::{
    ChannelPublisher, MemoryAnchorEventStore, MemoryMonitoringService, MemoryProofStore,
    MemoryStatusStore,
};
use anchor_witness::metrics::MetricsRegistry;
use anchor_witness::policy::ThresholdPolicy;
use anchor_witness::witness::{WitnessProofHandler, WitnessProviders};

/// Test anchor event ID
pub const ANCHOR_ID: &str = "hl:uEiCoSK5cP6XqFPexWvJVnDU6KwZzNcHXRs8NHmJQpSPfwA";

/// Witness URI number `n`
pub fn witness_uri(n: usize) -> WitnessUri {
    WitnessUri::new(format!("https://witness{n}.example.com/services/orb")).unwrap()
}

/// A proof document as a witness would send it
pub fn raw_proof(witness: &WitnessUri, domain: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "@context": "https://w3id.org/security/v1",
        "proof": {
            "type": "Ed25519Signature2020",
            "created": "2024-03-01T10:00:00Z",
            "domain": domain,
            "verificationMethod": format!("{witness}#key-1"),
            "proofPurpose": "assertionMethod",
            "proofValue": format!("z{}", witness.as_str().len())
        }
    }))
    .unwrap()
}

/// Same witness, different signature
pub fn conflicting_proof(witness: &WitnessUri) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "proof": {
            "created": "2024-03-01T10:05:00Z",
            "domain": "https://vct.example.com/log",
            "proofValue": format!("zOTHER-{witness}")
        }
    }))
    .unwrap()
}

/// Anchor event with an unsigned credential
pub fn anchor_event(index: &str) -> AnchorEvent {
    let body = json!({
        "@context": ["https://www.w3.org/2018/credentials/v1"],
        "type": ["VerifiableCredential", "AnchorCredential"],
        "issuer": "https://orb.example.com/services/orb",
        "credentialSubject": { "anchor": index }
    });
    let body = match body {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    AnchorEvent::new(index, AnchorCredential::new(Some(format!("{index}#vc")), body))
}

pub fn in_minutes(minutes: i64) -> DateTime<Utc> {
    Utc::now() + Duration::minutes(minutes)
}

/// Handler wired to memory stores, with handles on every store
pub struct Harness {
    pub anchor_events: Arc<MemoryAnchorEventStore>,
    pub proofs: Arc<MemoryProofStore>,
    pub statuses: Arc<MemoryStatusStore>,
    pub monitoring: Arc<MemoryMonitoringService>,
    pub metrics: Arc<MetricsRegistry>,
    pub handler: Arc<WitnessProofHandler>,
    pub published: mpsc::Receiver<FinalizedAnchorEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(ThresholdPolicy::default())
    }

    pub fn with_policy(policy: ThresholdPolicy) -> Self {
        let anchor_events = Arc::new(MemoryAnchorEventStore::new());
        let proofs = Arc::new(MemoryProofStore::new());
        let statuses = Arc::new(MemoryStatusStore::new());
        let monitoring = Arc::new(MemoryMonitoringService::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let (publisher, published) = ChannelPublisher::new(64);

        let handler = WitnessProofHandler::new(WitnessProviders {
            anchor_events: anchor_events.clone(),
            proofs: proofs.clone(),
            statuses: statuses.clone(),
            policy: Arc::new(policy),
            monitoring: monitoring.clone(),
            publisher: Arc::new(publisher),
        })
        .with_metrics(metrics.clone());

        Self {
            anchor_events,
            proofs,
            statuses,
            monitoring,
            metrics,
            handler: Arc::new(handler),
            published,
        }
    }

    /// Store the anchor event and register its witnesses
    pub async fn anchor(&self, index: &str, witnesses: Vec<Witness>) {
        self.anchor_events.put(anchor_event(index)).await;
        self.handler.register(index, witnesses).await.unwrap();
    }

    /// Everything published so far
    pub fn drain_published(&mut self) -> Vec<FinalizedAnchorEvent> {
        let mut published = Vec::new();
        while let Ok(finalized) = self.published.try_recv() {
            published.push(finalized);
        }
        published
    }
}

/// Batch witnesses 1..=n
pub fn batch_witnesses(n: usize) -> Vec<Witness> {
    (1..=n).map(|i| Witness::batch(witness_uri(i))).collect()
}
