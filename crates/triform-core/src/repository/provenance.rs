//! Provenance ledger trait.

use std::sync::Arc;

use triform_types::error::RepositoryError;
use triform_types::provenance::ProvenanceRecord;
use uuid::Uuid;

/// Append-only storage for provenance records.
///
/// The trait exposes no update or delete. Implementations must
/// be safe under concurrent appends and return records in insertion order.
pub trait ProvenanceLedger: Send + Sync {
    /// Append a record. Appending an id that already exists is a conflict.
    fn append(
        &self,
        record: &ProvenanceRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a record by id.
    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ProvenanceRecord>, RepositoryError>> + Send;

    /// All records of one workflow, in insertion order.
    fn list_for_workflow(
        &self,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ProvenanceRecord>, RepositoryError>> + Send;

    /// The whole ledger, in insertion order.
    fn list_all(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ProvenanceRecord>, RepositoryError>> + Send;
}

impl<T: ProvenanceLedger> ProvenanceLedger for Arc<T> {
    fn append(
        &self,
        record: &ProvenanceRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send {
        (**self).append(record)
    }

    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ProvenanceRecord>, RepositoryError>> + Send {
        (**self).get(id)
    }

    fn list_for_workflow(
        &self,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ProvenanceRecord>, RepositoryError>> + Send {
        (**self).list_for_workflow(workflow_id)
    }

    fn list_all(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ProvenanceRecord>, RepositoryError>> + Send {
        (**self).list_all()
    }
}
