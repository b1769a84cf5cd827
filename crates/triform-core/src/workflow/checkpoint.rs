//! Durable checkpoint manager for workflow execution state.
//!
//! Wraps a `CheckpointRepository` with the snapshot format: after every
//! parallel group the orchestrator writes one checkpoint holding per-step
//! status and output references, keyed by step arena index. On resume the
//! latest snapshot is parsed and checked against the definition; anything
//! unreadable or stale leads to a cold start, never to an error.

use std::collections::HashSet;

use chrono::Utc;
use triform_types::checkpoint::{CHECKPOINT_FORMAT_VERSION, Checkpoint, CheckpointStep};
use triform_types::workflow::{WorkflowDefinition, WorkflowState};
use uuid::Uuid;

use crate::repository::checkpoint::{CheckpointRepository, StoredCheckpoint};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying repository operation failed.
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    /// The stored snapshot cannot be used.
    #[error("checkpoint {sequence} of workflow {workflow_id} is corrupt: {reason}")]
    Corrupt {
        workflow_id: Uuid,
        sequence: u64,
        reason: String,
    },

    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What a resume should start from.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    /// No checkpoint exists.
    Fresh,
    /// A valid checkpoint for the current definition.
    Restored(Checkpoint),
    /// A checkpoint exists but cannot be used; run from scratch.
    ColdStart { reason: String },
}

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Writes, prunes, and restores checkpoints.
///
/// Generic over `R: CheckpointRepository` so it works with any storage
/// backend (SQLite, in-memory).
pub struct CheckpointManager<R: CheckpointRepository> {
    repo: R,
    retention: usize,
}

impl<R: CheckpointRepository> CheckpointManager<R> {
    pub fn new(repo: R, retention: usize) -> Self {
        Self {
            repo,
            retention: retention.max(1),
        }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Snapshot the current step states and return the new sequence number.
    ///
    /// Sequences continue after the highest stored one, unreadable snapshots
    /// included, so a corrupt snapshot is never overwritten.
    pub async fn write(
        &self,
        definition_hash: &str,
        state: &WorkflowState,
    ) -> Result<u64, CheckpointError> {
        let workflow_id = state.workflow_id;
        let sequence = self
            .repo
            .max_sequence(&workflow_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .map_or(1, |s| s + 1);

        let now = Utc::now();
        let checkpoint = Checkpoint {
            format_version: CHECKPOINT_FORMAT_VERSION,
            workflow_id,
            sequence,
            definition_hash: definition_hash.to_string(),
            created_at: now,
            steps: state
                .steps
                .iter()
                .enumerate()
                .map(|(index, s)| CheckpointStep {
                    index,
                    step_id: s.step_id.clone(),
                    status: s.status,
                    output: s.output.clone(),
                    attempts: s.attempts,
                    timestamp: s.completed_at.or(s.started_at).unwrap_or(now),
                })
                .collect(),
        };

        let stored = StoredCheckpoint {
            workflow_id,
            sequence,
            created_at: now,
            payload: serde_json::to_string(&checkpoint)?,
        };
        self.repo
            .save(&stored)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        let pruned = self
            .repo
            .prune(&workflow_id, self.retention)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            workflow_id = %workflow_id,
            sequence,
            pruned,
            "checkpoint written"
        );
        Ok(sequence)
    }

    /// Load and validate the latest checkpoint against a definition.
    pub async fn load_latest(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        let Some(stored) = self
            .repo
            .latest(&definition.id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
        else {
            return Ok(None);
        };

        let corrupt = |reason: String| CheckpointError::Corrupt {
            workflow_id: stored.workflow_id,
            sequence: stored.sequence,
            reason,
        };

        let checkpoint: Checkpoint =
            serde_json::from_str(&stored.payload).map_err(|e| corrupt(e.to_string()))?;

        if checkpoint.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {}",
                checkpoint.format_version
            )));
        }
        if checkpoint.workflow_id != stored.workflow_id || checkpoint.sequence != stored.sequence {
            return Err(corrupt("payload does not match its storage key".to_string()));
        }

        let mut seen = HashSet::new();
        for step in &checkpoint.steps {
            let matches = definition
                .steps
                .get(step.index)
                .is_some_and(|s| s.id == step.step_id);
            if !matches {
                return Err(corrupt(format!(
                    "step '{}' at index {} is not in the definition",
                    step.step_id, step.index
                )));
            }
            if !seen.insert(step.index) {
                return Err(corrupt(format!("step index {} recorded twice", step.index)));
            }
        }

        Ok(Some(checkpoint))
    }

    /// Decide where a resume starts.
    ///
    /// Corruption and definition-hash mismatches are logged and turned into
    /// a cold start. Repository failures are still errors.
    pub async fn restore(
        &self,
        definition: &WorkflowDefinition,
        definition_hash: &str,
    ) -> Result<RestoreOutcome, CheckpointError> {
        match self.load_latest(definition).await {
            Ok(None) => Ok(RestoreOutcome::Fresh),
            Ok(Some(cp)) if cp.definition_hash != definition_hash => {
                let reason = format!(
                    "checkpoint {} was taken against a different definition",
                    cp.sequence
                );
                tracing::warn!(workflow_id = %definition.id, sequence = cp.sequence, "{reason}; cold restart");
                Ok(RestoreOutcome::ColdStart { reason })
            }
            Ok(Some(cp)) => {
                tracing::info!(workflow_id = %definition.id, sequence = cp.sequence, "checkpoint restored");
                Ok(RestoreOutcome::Restored(cp))
            }
            Err(err @ CheckpointError::Corrupt { .. }) => {
                tracing::warn!(workflow_id = %definition.id, error = %err, "cold restart");
                Ok(RestoreOutcome::ColdStart {
                    reason: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryCheckpointRepository;
    use crate::workflow::definition::parse_workflow_yaml;
    use triform_types::provenance::ArtifactRef;
    use triform_types::workflow::StepStatus;

    const YAML: &str = r#"
name: cp
steps:
  - id: a
    tool: data.literal
  - id: b
    tool: data.literal
    depends_on: [a]
"#;

    fn setup(retention: usize) -> (CheckpointManager<InMemoryCheckpointRepository>, WorkflowDefinition) {
        let def = parse_workflow_yaml(YAML).unwrap();
        (
            CheckpointManager::new(InMemoryCheckpointRepository::new(), retention),
            def,
        )
    }

    fn state_with_a_done(def: &WorkflowDefinition) -> WorkflowState {
        let mut state = WorkflowState::new(def);
        state.steps[0].status = StepStatus::Completed;
        state.steps[0].output = Some(ArtifactRef::new("hash-a"));
        state.steps[0].attempts = 1;
        state
    }

    #[tokio::test]
    async fn test_write_then_restore() {
        let (mgr, def) = setup(5);
        let state = state_with_a_done(&def);
        assert_eq!(mgr.write("h1", &state).await.unwrap(), 1);
        assert_eq!(mgr.write("h1", &state).await.unwrap(), 2);

        match mgr.restore(&def, "h1").await.unwrap() {
            RestoreOutcome::Restored(cp) => {
                assert_eq!(cp.sequence, 2);
                assert_eq!(cp.completed_indices().collect::<Vec<_>>(), vec![0]);
                assert_eq!(cp.steps[0].output, Some(ArtifactRef::new("hash-a")));
                assert!(cp.steps[1].output.is_none());
            }
            other => panic!("expected restored, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_checkpoint_is_fresh() {
        let (mgr, def) = setup(5);
        assert_eq!(mgr.restore(&def, "h").await.unwrap(), RestoreOutcome::Fresh);
    }

    #[tokio::test]
    async fn test_retention_prunes_old_snapshots() {
        let (mgr, def) = setup(2);
        let state = WorkflowState::new(&def);
        for _ in 0..4 {
            mgr.write("h", &state).await.unwrap();
        }
        assert_eq!(mgr.repo().sequences(&def.id), vec![3, 4]);
    }

    #[tokio::test]
    async fn test_corrupt_payload_cold_starts_and_is_not_overwritten() {
        let (mgr, def) = setup(5);
        mgr.repo()
            .save(&StoredCheckpoint {
                workflow_id: def.id,
                sequence: 7,
                created_at: Utc::now(),
                payload: "{not json".to_string(),
            })
            .await
            .unwrap();

        let outcome = mgr.restore(&def, "h").await.unwrap();
        assert!(matches!(outcome, RestoreOutcome::ColdStart { .. }));

        let next = mgr.write("h", &WorkflowState::new(&def)).await.unwrap();
        assert_eq!(next, 8);
    }

    #[tokio::test]
    async fn test_unknown_step_index_is_corrupt() {
        let (mgr, def) = setup(5);
        let mut state = WorkflowState::new(&def);
        state.steps[1].step_id = "renamed".to_string();
        mgr.write("h", &state).await.unwrap();

        let err = mgr.load_latest(&def).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { sequence: 1, .. }));
    }

    #[tokio::test]
    async fn test_definition_hash_mismatch_cold_starts() {
        let (mgr, def) = setup(5);
        mgr.write("old", &state_with_a_done(&def)).await.unwrap();
        let outcome = mgr.restore(&def, "new").await.unwrap();
        assert!(matches!(outcome, RestoreOutcome::ColdStart { reason } if reason.contains("different definition")));
    }
}
