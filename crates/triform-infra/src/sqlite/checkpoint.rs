//! SQLite checkpoint repository.
//!
//! Implements `CheckpointRepository` from `triform-core`. Payloads are stored
//! verbatim; parsing and validation happen in the core `CheckpointManager`.

use chrono::{DateTime, Utc};
use sqlx::Row;
use triform_core::repository::checkpoint::{CheckpointRepository, StoredCheckpoint};
use triform_types::error::RepositoryError;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CheckpointRepository`.
pub struct SqliteCheckpointRepository {
    pool: DatabasePool,
}

impl SqliteCheckpointRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct CheckpointRow {
    workflow_id: String,
    sequence: i64,
    created_at: String,
    payload: String,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            workflow_id: row.try_get("workflow_id")?,
            sequence: row.try_get("sequence")?,
            created_at: row.try_get("created_at")?,
            payload: row.try_get("payload")?,
        })
    }

    fn into_stored(self) -> Result<StoredCheckpoint, RepositoryError> {
        let workflow_id = self
            .workflow_id
            .parse::<Uuid>()
            .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))?;

        Ok(StoredCheckpoint {
            workflow_id,
            sequence: self.sequence as u64,
            created_at,
            payload: self.payload,
        })
    }
}

// ---------------------------------------------------------------------------
// CheckpointRepository impl
// ---------------------------------------------------------------------------

impl CheckpointRepository for SqliteCheckpointRepository {
    async fn save(&self, checkpoint: &StoredCheckpoint) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO checkpoints (workflow_id, sequence, created_at, payload)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(workflow_id, sequence) DO UPDATE SET
                 created_at = excluded.created_at,
                 payload = excluded.payload"#,
        )
        .bind(checkpoint.workflow_id.to_string())
        .bind(checkpoint.sequence as i64)
        .bind(checkpoint.created_at.to_rfc3339())
        .bind(&checkpoint.payload)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn latest(&self, workflow_id: &Uuid) -> Result<Option<StoredCheckpoint>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT workflow_id, sequence, created_at, payload FROM checkpoints
               WHERE workflow_id = ? ORDER BY sequence DESC LIMIT 1"#,
        )
        .bind(workflow_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let row = CheckpointRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(row.into_stored()?))
            }
            None => Ok(None),
        }
    }

    async fn max_sequence(&self, workflow_id: &Uuid) -> Result<Option<u64>, RepositoryError> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM checkpoints WHERE workflow_id = ?")
                .bind(workflow_id.to_string())
                .fetch_one(&self.pool.reader)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(max.map(|s| s as u64))
    }

    async fn prune(&self, workflow_id: &Uuid, keep: usize) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"DELETE FROM checkpoints
               WHERE workflow_id = ?1 AND sequence NOT IN (
                 SELECT sequence FROM checkpoints
                 WHERE workflow_id = ?1
                 ORDER BY sequence DESC LIMIT ?2
               )"#,
        )
        .bind(workflow_id.to_string())
        .bind(keep as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
