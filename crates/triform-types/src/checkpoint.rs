//! Persisted checkpoint format.
//!
//! A checkpoint snapshots per-step status after a parallel group finishes.
//! Steps are addressed by their arena index in the definition and carry
//! output references only, never payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provenance::ArtifactRef;
use crate::workflow::StepStatus;

/// Current checkpoint format version.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// One durable snapshot of a workflow's step states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub workflow_id: Uuid,
    /// Monotonically increasing per workflow.
    pub sequence: u64,
    /// Hash of the definition the snapshot was taken against.
    pub definition_hash: String,
    pub created_at: DateTime<Utc>,
    pub steps: Vec<CheckpointStep>,
}

/// Per-step entry of a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointStep {
    /// Arena index of the step in the definition.
    pub index: usize,
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ArtifactRef>,
    #[serde(default)]
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    /// Indices of steps recorded as completed.
    pub fn completed_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| s.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_json_omits_missing_output() {
        let cp = Checkpoint {
            format_version: CHECKPOINT_FORMAT_VERSION,
            workflow_id: Uuid::nil(),
            sequence: 2,
            definition_hash: "d".to_string(),
            created_at: Utc::now(),
            steps: vec![
                CheckpointStep {
                    index: 0,
                    step_id: "a".to_string(),
                    status: StepStatus::Completed,
                    output: Some(ArtifactRef::new("h")),
                    attempts: 1,
                    timestamp: Utc::now(),
                },
                CheckpointStep {
                    index: 1,
                    step_id: "b".to_string(),
                    status: StepStatus::Pending,
                    output: None,
                    attempts: 0,
                    timestamp: Utc::now(),
                },
            ],
        };
        let value = serde_json::to_value(&cp).unwrap();
        assert!(value["steps"][1].get("output").is_none());
        assert_eq!(cp.completed_indices().collect::<Vec<_>>(), vec![0]);
    }
}
