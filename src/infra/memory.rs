//! In-memory collaborator implementations
//!
//! Used for single-process deployments and tests. Each store guards its map
//! with one `RwLock`, so every operation on an anchor event is linearizable.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::{
    proof_digest, AnchorEvent, Witness, WitnessProof, WitnessStatus, WitnessUri,
};
use crate::infra::{
    AnchorEventStore, MonitoringService, ProofStore, Result, StatusStore, WitnessError,
};

// ============================================================================
// Status store
// ============================================================================

/// Status store backed by a hash map
#[derive(Default)]
pub struct MemoryStatusStore {
    statuses: RwLock<HashMap<String, WitnessStatus>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn add_status(&self, anchor_event_id: &str, status: WitnessStatus) -> Result<()> {
        let mut statuses = self.statuses.write().await;

        if let Some(current) = statuses.get(anchor_event_id) {
            if !current.can_transition_to(status) {
                return Err(WitnessError::InvalidStatusTransition {
                    anchor_event_id: anchor_event_id.to_string(),
                    from: current.to_string(),
                    to: status.to_string(),
                });
            }
        }

        statuses.insert(anchor_event_id.to_string(), status);
        Ok(())
    }

    async fn get_status(&self, anchor_event_id: &str) -> Result<WitnessStatus> {
        self.statuses
            .read()
            .await
            .get(anchor_event_id)
            .copied()
            .ok_or_else(|| WitnessError::StatusNotFound(anchor_event_id.to_string()))
    }

    async fn set_status_if(
        &self,
        anchor_event_id: &str,
        expected: WitnessStatus,
        new: WitnessStatus,
    ) -> Result<bool> {
        let mut statuses = self.statuses.write().await;

        match statuses.get_mut(anchor_event_id) {
            None => Err(WitnessError::StatusNotFound(anchor_event_id.to_string())),
            Some(current) if *current == expected => {
                *current = new;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }
}

// ============================================================================
// Proof store
// ============================================================================

struct StoredProof {
    witness: Witness,
    proof: Option<Vec<u8>>,
    digest: Option<[u8; 32]>,
}

/// Proof store keeping witnesses in registration order
#[derive(Default)]
pub struct MemoryProofStore {
    entries: RwLock<HashMap<String, Vec<StoredProof>>>,
}

impl MemoryProofStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of proofs received for an anchor event
    pub async fn proof_count(&self, anchor_event_id: &str) -> usize {
        self.entries
            .read()
            .await
            .get(anchor_event_id)
            .map(|entries| entries.iter().filter(|e| e.proof.is_some()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ProofStore for MemoryProofStore {
    async fn put(&self, anchor_event_id: &str, witnesses: Vec<Witness>) -> Result<()> {
        let mut entries = self.entries.write().await;
        let registered = entries.entry(anchor_event_id.to_string()).or_default();

        for witness in witnesses {
            if registered.iter().any(|e| e.witness.uri == witness.uri) {
                continue;
            }
            registered.push(StoredProof {
                witness,
                proof: None,
                digest: None,
            });
        }

        Ok(())
    }

    async fn add_proof(
        &self,
        anchor_event_id: &str,
        witness: &WitnessUri,
        proof: &[u8],
    ) -> Result<()> {
        let mut entries = self.entries.write().await;

        let not_found = || WitnessError::WitnessNotFound {
            anchor_event_id: anchor_event_id.to_string(),
            witness: witness.to_string(),
        };

        let entry = entries
            .get_mut(anchor_event_id)
            .and_then(|registered| registered.iter_mut().find(|e| &e.witness.uri == witness))
            .ok_or_else(not_found)?;

        let digest = proof_digest(proof);
        let existing = entry.digest;
        match existing {
            None => {
                entry.proof = Some(proof.to_vec());
                entry.digest = Some(digest);
                Ok(())
            }
            Some(existing) if existing == digest => Ok(()),
            Some(_) => Err(WitnessError::ConflictingProof {
                anchor_event_id: anchor_event_id.to_string(),
                witness: witness.to_string(),
            }),
        }
    }

    async fn get(&self, anchor_event_id: &str) -> Result<Vec<WitnessProof>> {
        Ok(self
            .entries
            .read()
            .await
            .get(anchor_event_id)
            .map(|registered| {
                registered
                    .iter()
                    .map(|e| WitnessProof {
                        witness: e.witness.clone(),
                        proof: e.proof.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ============================================================================
// Anchor event store
// ============================================================================

/// Anchor event store keyed by index
#[derive(Default)]
pub struct MemoryAnchorEventStore {
    events: RwLock<HashMap<String, AnchorEvent>>,
}

impl MemoryAnchorEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an anchor event under its index
    pub async fn put(&self, anchor_event: AnchorEvent) {
        self.events
            .write()
            .await
            .insert(anchor_event.index.clone(), anchor_event);
    }
}

#[async_trait]
impl AnchorEventStore for MemoryAnchorEventStore {
    async fn get(&self, index: &str) -> Result<AnchorEvent> {
        self.events
            .read()
            .await
            .get(index)
            .cloned()
            .ok_or_else(|| WitnessError::AnchorEventNotFound(index.to_string()))
    }
}

// ============================================================================
// Monitoring
// ============================================================================

/// A registered inclusion watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watch {
    pub anchor_event_index: String,
    pub domain: String,
    pub created: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Records watches so an external sweeper can check inclusion
///
/// Proofs with an empty domain come from witnesses without a log and have
/// nothing to monitor.
#[derive(Default)]
pub struct MemoryMonitoringService {
    watches: RwLock<Vec<Watch>>,
}

impl MemoryMonitoringService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn watches(&self) -> Vec<Watch> {
        self.watches.read().await.clone()
    }

    /// Remove and return watches whose window closed before `now`
    pub async fn take_expired(&self, now: DateTime<Utc>) -> Vec<Watch> {
        let mut watches = self.watches.write().await;
        let (expired, live): (Vec<_>, Vec<_>) =
            watches.drain(..).partition(|w| w.end_time < now);
        *watches = live;
        expired
    }
}

#[async_trait]
impl MonitoringService for MemoryMonitoringService {
    async fn watch(
        &self,
        anchor_event: &AnchorEvent,
        end_time: DateTime<Utc>,
        domain: &str,
        created: DateTime<Utc>,
    ) -> Result<()> {
        if domain.is_empty() {
            tracing::debug!(
                anchor_event_id = %anchor_event.index,
                "Proof has no domain, skipping monitoring"
            );
            return Ok(());
        }

        let watch = Watch {
            anchor_event_index: anchor_event.index.clone(),
            domain: domain.to_string(),
            created,
            end_time,
        };

        let mut watches = self.watches.write().await;
        if !watches.contains(&watch) {
            watches.push(watch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AnchorCredential;
    use chrono::Duration;

    fn uri(s: &str) -> WitnessUri {
        WitnessUri::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_status_missing_is_not_found() {
        let store = MemoryStatusStore::new();
        let err = store.get_status("hl:missing").await.unwrap_err();
        assert!(matches!(err, WitnessError::StatusNotFound(_)));
        assert!(store
            .set_status_if("hl:missing", WitnessStatus::InProcess, WitnessStatus::Completed)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_status_compare_and_set() {
        let store = MemoryStatusStore::new();
        store
            .add_status("hl:1", WitnessStatus::InProcess)
            .await
            .unwrap();

        assert!(store
            .set_status_if("hl:1", WitnessStatus::InProcess, WitnessStatus::Completed)
            .await
            .unwrap());
        assert!(!store
            .set_status_if("hl:1", WitnessStatus::InProcess, WitnessStatus::Completed)
            .await
            .unwrap());
        assert_eq!(
            store.get_status("hl:1").await.unwrap(),
            WitnessStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_status_never_reverts() {
        let store = MemoryStatusStore::new();
        store
            .add_status("hl:1", WitnessStatus::Completed)
            .await
            .unwrap();

        let err = store
            .add_status("hl:1", WitnessStatus::InProcess)
            .await
            .unwrap_err();
        assert!(matches!(err, WitnessError::InvalidStatusTransition { .. }));
    }

    #[tokio::test]
    async fn test_proof_first_writer_wins() {
        let store = MemoryProofStore::new();
        let w1 = uri("https://w1.example.com");
        store
            .put("hl:1", vec![Witness::batch(w1.clone())])
            .await
            .unwrap();

        store.add_proof("hl:1", &w1, b"first").await.unwrap();
        store.add_proof("hl:1", &w1, b"first").await.unwrap();
        let err = store.add_proof("hl:1", &w1, b"second").await.unwrap_err();
        assert!(matches!(err, WitnessError::ConflictingProof { .. }));

        let proofs = store.get("hl:1").await.unwrap();
        assert_eq!(proofs.len(), 1);
        assert_eq!(proofs[0].proof.as_deref(), Some(&b"first"[..]));
    }

    #[tokio::test]
    async fn test_proof_unknown_witness() {
        let store = MemoryProofStore::new();
        store
            .put("hl:1", vec![Witness::batch(uri("https://w1.example.com"))])
            .await
            .unwrap();

        let err = store
            .add_proof("hl:1", &uri("https://w9.example.com"), b"p")
            .await
            .unwrap_err();
        assert!(matches!(err, WitnessError::WitnessNotFound { .. }));

        let err = store
            .add_proof("hl:2", &uri("https://w1.example.com"), b"p")
            .await
            .unwrap_err();
        assert!(matches!(err, WitnessError::WitnessNotFound { .. }));
    }

    #[tokio::test]
    async fn test_proof_put_keeps_order_and_ignores_reregistration() {
        let store = MemoryProofStore::new();
        let w1 = uri("https://w1.example.com");
        let w2 = uri("https://w2.example.com");
        store
            .put(
                "hl:1",
                vec![Witness::batch(w1.clone()), Witness::system(w2.clone())],
            )
            .await
            .unwrap();
        store.add_proof("hl:1", &w1, b"p1").await.unwrap();
        store
            .put("hl:1", vec![Witness::batch(w1.clone())])
            .await
            .unwrap();

        let proofs = store.get("hl:1").await.unwrap();
        assert_eq!(proofs.len(), 2);
        assert_eq!(proofs[0].uri(), &w1);
        assert!(proofs[0].has_proof());
        assert_eq!(proofs[1].uri(), &w2);
        assert!(!proofs[1].has_proof());
        assert_eq!(store.proof_count("hl:1").await, 1);
    }

    #[tokio::test]
    async fn test_anchor_event_store() {
        let store = MemoryAnchorEventStore::new();
        store
            .put(AnchorEvent::new(
                "hl:1",
                AnchorCredential::new(None, Default::default()),
            ))
            .await;

        assert_eq!(store.get("hl:1").await.unwrap().index, "hl:1");
        assert!(matches!(
            store.get("hl:2").await.unwrap_err(),
            WitnessError::AnchorEventNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_monitoring_records_and_expires_watches() {
        let monitoring = MemoryMonitoringService::new();
        let event = AnchorEvent::new("hl:1", AnchorCredential::new(None, Default::default()));
        let now = Utc::now();

        monitoring
            .watch(&event, now - Duration::minutes(1), "https://log-a", now)
            .await
            .unwrap();
        monitoring
            .watch(&event, now + Duration::minutes(5), "https://log-b", now)
            .await
            .unwrap();
        monitoring
            .watch(&event, now + Duration::minutes(5), "", now)
            .await
            .unwrap();

        assert_eq!(monitoring.watches().await.len(), 2);

        let expired = monitoring.take_expired(now).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].domain, "https://log-a");
        assert_eq!(monitoring.watches().await.len(), 1);
    }
}
