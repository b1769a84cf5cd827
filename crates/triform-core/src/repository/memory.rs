//! In-memory adapters for every repository port.
//!
//! Used by tests and by callers that do not need durability. Behaviour
//! matches the persistent adapters in triform-infra: content addressing,
//! append-only ledger, upserts, and sequence-ordered checkpoints.

use std::collections::BTreeMap;
use std::sync::RwLock;

use dashmap::DashMap;
use serde_json::Value;
use triform_types::error::RepositoryError;
use triform_types::provenance::ProvenanceRecord;
use triform_types::representation::Representation;
use uuid::Uuid;

use super::artifact::ArtifactStore;
use super::checkpoint::{CheckpointRepository, StoredCheckpoint};
use super::provenance::ProvenanceLedger;
use super::representation::RepresentationStore;
use crate::hash::content_hash;

fn poisoned() -> RepositoryError {
    RepositoryError::Connection("in-memory lock poisoned".to_string())
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    artifacts: DashMap<String, Value>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Drop an artifact. Only used to simulate lost data in tests.
    pub fn evict(&self, hash: &str) -> bool {
        self.artifacts.remove(hash).is_some()
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, value: &Value) -> Result<String, RepositoryError> {
        let hash = content_hash(value)?;
        self.artifacts.entry(hash.clone()).or_insert_with(|| value.clone());
        Ok(hash)
    }

    async fn get(&self, hash: &str) -> Result<Option<Value>, RepositoryError> {
        Ok(self.artifacts.get(hash).map(|v| v.clone()))
    }

    async fn contains(&self, hash: &str) -> Result<bool, RepositoryError> {
        Ok(self.artifacts.contains_key(hash))
    }
}

// ---------------------------------------------------------------------------
// Provenance ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryProvenanceLedger {
    records: RwLock<Vec<ProvenanceRecord>>,
}

impl InMemoryProvenanceLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProvenanceLedger for InMemoryProvenanceLedger {
    async fn append(&self, record: &ProvenanceRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        if records.iter().any(|r| r.id == record.id) {
            return Err(RepositoryError::Conflict(format!(
                "provenance record {} already exists",
                record.id
            )));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<ProvenanceRecord>, RepositoryError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.iter().find(|r| r.id == *id).cloned())
    }

    async fn list_for_workflow(
        &self,
        workflow_id: &Uuid,
    ) -> Result<Vec<ProvenanceRecord>, RepositoryError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records
            .iter()
            .filter(|r| r.workflow_id == Some(*workflow_id))
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<ProvenanceRecord>, RepositoryError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.clone())
    }
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryCheckpointRepository {
    checkpoints: DashMap<Uuid, BTreeMap<u64, StoredCheckpoint>>,
}

impl InMemoryCheckpointRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored sequences for a workflow, ascending.
    pub fn sequences(&self, workflow_id: &Uuid) -> Vec<u64> {
        self.checkpoints
            .get(workflow_id)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl CheckpointRepository for InMemoryCheckpointRepository {
    async fn save(&self, checkpoint: &StoredCheckpoint) -> Result<(), RepositoryError> {
        self.checkpoints
            .entry(checkpoint.workflow_id)
            .or_default()
            .insert(checkpoint.sequence, checkpoint.clone());
        Ok(())
    }

    async fn latest(&self, workflow_id: &Uuid) -> Result<Option<StoredCheckpoint>, RepositoryError> {
        Ok(self
            .checkpoints
            .get(workflow_id)
            .and_then(|m| m.values().next_back().cloned()))
    }

    async fn max_sequence(&self, workflow_id: &Uuid) -> Result<Option<u64>, RepositoryError> {
        Ok(self
            .checkpoints
            .get(workflow_id)
            .and_then(|m| m.keys().next_back().copied()))
    }

    async fn prune(&self, workflow_id: &Uuid, keep: usize) -> Result<u64, RepositoryError> {
        let Some(mut stored) = self.checkpoints.get_mut(workflow_id) else {
            return Ok(0);
        };
        let excess = stored.len().saturating_sub(keep);
        let doomed: Vec<u64> = stored.keys().take(excess).copied().collect();
        for sequence in &doomed {
            stored.remove(sequence);
        }
        Ok(doomed.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Representations
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryRepresentationStore {
    representations: DashMap<Uuid, Representation>,
}

impl InMemoryRepresentationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.representations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.representations.is_empty()
    }
}

impl RepresentationStore for InMemoryRepresentationStore {
    async fn save(&self, representation: &Representation) -> Result<(), RepositoryError> {
        self.representations
            .insert(representation.id, representation.clone());
        Ok(())
    }

    async fn load(&self, id: &Uuid) -> Result<Option<Representation>, RepositoryError> {
        Ok(self.representations.get(id).map(|r| r.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use triform_types::provenance::OperationStatus;

    fn record(workflow_id: Option<Uuid>) -> ProvenanceRecord {
        ProvenanceRecord {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            operation: "step.execute".to_string(),
            tool_id: "data.literal".to_string(),
            tool_version: semver::Version::new(1, 0, 0),
            inputs: vec![],
            outputs: vec![],
            duration_ms: 1,
            confidence: None,
            workflow_id,
            step_id: None,
            attempt: 1,
            status: OperationStatus::Success,
            error: None,
            depends_on: vec![],
        }
    }

    #[tokio::test]
    async fn test_artifact_put_is_idempotent() {
        let store = InMemoryArtifactStore::new();
        let a = store.put(&json!({"x": 1, "y": 2})).await.unwrap();
        let b = store.put(&json!({"y": 2, "x": 1})).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert!(store.contains(&a).await.unwrap());
        assert_eq!(store.get(&a).await.unwrap(), Some(json!({"x": 1, "y": 2})));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ledger_rejects_duplicate_ids() {
        let ledger = InMemoryProvenanceLedger::new();
        let r = record(None);
        ledger.append(&r).await.unwrap();
        let err = ledger.append(&r).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_ledger_lists_in_insertion_order() {
        let ledger = InMemoryProvenanceLedger::new();
        let wf = Uuid::now_v7();
        let first = record(Some(wf));
        let other = record(None);
        let second = record(Some(wf));
        for r in [&first, &other, &second] {
            ledger.append(r).await.unwrap();
        }
        let ids: Vec<Uuid> = ledger
            .list_for_workflow(&wf)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(ledger.list_all().await.unwrap().len(), 3);
        assert_eq!(ledger.get(&other.id).await.unwrap(), Some(other));
    }

    #[tokio::test]
    async fn test_checkpoint_latest_and_prune() {
        let repo = InMemoryCheckpointRepository::new();
        let wf = Uuid::now_v7();
        for sequence in 1..=4 {
            repo.save(&StoredCheckpoint {
                workflow_id: wf,
                sequence,
                created_at: Utc::now(),
                payload: format!("{{\"n\": {sequence}}}"),
            })
            .await
            .unwrap();
        }
        assert_eq!(repo.max_sequence(&wf).await.unwrap(), Some(4));
        assert_eq!(repo.latest(&wf).await.unwrap().unwrap().sequence, 4);

        let deleted = repo.prune(&wf, 2).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(repo.sequences(&wf), vec![3, 4]);
        assert_eq!(repo.prune(&Uuid::now_v7(), 2).await.unwrap(), 0);
    }
}
