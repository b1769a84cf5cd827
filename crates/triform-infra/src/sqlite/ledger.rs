//! SQLite provenance ledger.
//!
//! Implements `ProvenanceLedger` from `triform-core`. Each record is stored as
//! a JSON blob next to a few indexed columns. The table carries triggers that
//! abort any UPDATE or DELETE, so the ledger stays append-only even for
//! writers that bypass this adapter.

use sqlx::Row;
use triform_core::repository::provenance::ProvenanceLedger;
use triform_types::error::RepositoryError;
use triform_types::provenance::{OperationStatus, ProvenanceRecord};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ProvenanceLedger`.
pub struct SqliteProvenanceLedger {
    pool: DatabasePool,
}

impl SqliteProvenanceLedger {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn status_str(status: OperationStatus) -> &'static str {
    match status {
        OperationStatus::Success => "success",
        OperationStatus::Failure => "failure",
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ProvenanceRecord, RepositoryError> {
    let json: String = row
        .try_get("record")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    serde_json::from_str(&json)
        .map_err(|e| RepositoryError::Query(format!("invalid provenance record JSON: {e}")))
}

impl ProvenanceLedger for SqliteProvenanceLedger {
    async fn append(&self, record: &ProvenanceRecord) -> Result<(), RepositoryError> {
        let json = serde_json::to_string(record)?;

        let result = sqlx::query(
            r#"INSERT INTO provenance_records
                 (id, workflow_id, step_id, tool_id, tool_version, status, recorded_at, record)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.id.to_string())
        .bind(record.workflow_id.map(|id| id.to_string()))
        .bind(record.step_id.as_deref())
        .bind(&record.tool_id)
        .bind(record.tool_version.to_string())
        .bind(status_str(record.status))
        .bind(record.timestamp.to_rfc3339())
        .bind(json)
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                RepositoryError::Conflict(format!("provenance record {} already exists", record.id)),
            ),
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        }
    }

    async fn get(&self, id: &Uuid) -> Result<Option<ProvenanceRecord>, RepositoryError> {
        let row = sqlx::query("SELECT record FROM provenance_records WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_for_workflow(
        &self,
        workflow_id: &Uuid,
    ) -> Result<Vec<ProvenanceRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT record FROM provenance_records WHERE workflow_id = ? ORDER BY seq ASC",
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(record_from_row).collect()
    }

    async fn list_all(&self) -> Result<Vec<ProvenanceRecord>, RepositoryError> {
        let rows = sqlx::query("SELECT record FROM provenance_records ORDER BY seq ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(record_from_row).collect()
    }
}
