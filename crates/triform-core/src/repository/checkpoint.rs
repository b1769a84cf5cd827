//! Checkpoint repository trait.
//!
//! Checkpoints are stored as opaque serialized payloads so that a corrupt
//! payload can still be located by sequence and reported, rather than
//! vanishing inside the adapter.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use triform_types::error::RepositoryError;
use uuid::Uuid;

/// A checkpoint payload as stored, not yet parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCheckpoint {
    pub workflow_id: Uuid,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub payload: String,
}

/// Repository trait for durable checkpoint snapshots.
pub trait CheckpointRepository: Send + Sync {
    /// Store a snapshot. `(workflow_id, sequence)` is unique; saving an
    /// existing pair replaces it.
    fn save(
        &self,
        checkpoint: &StoredCheckpoint,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// The snapshot with the highest sequence for a workflow.
    fn latest(
        &self,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<StoredCheckpoint>, RepositoryError>> + Send;

    /// Highest stored sequence, including unreadable snapshots.
    fn max_sequence(
        &self,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<u64>, RepositoryError>> + Send;

    /// Delete all but the newest `keep` snapshots. Returns the number deleted.
    fn prune(
        &self,
        workflow_id: &Uuid,
        keep: usize,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}

impl<T: CheckpointRepository> CheckpointRepository for Arc<T> {
    fn save(
        &self,
        checkpoint: &StoredCheckpoint,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send {
        (**self).save(checkpoint)
    }

    fn latest(
        &self,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<StoredCheckpoint>, RepositoryError>> + Send {
        (**self).latest(workflow_id)
    }

    fn max_sequence(
        &self,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<u64>, RepositoryError>> + Send {
        (**self).max_sequence(workflow_id)
    }

    fn prune(
        &self,
        workflow_id: &Uuid,
        keep: usize,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send {
        (**self).prune(workflow_id, keep)
    }
}
