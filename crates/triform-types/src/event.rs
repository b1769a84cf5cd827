//! Execution events for the Triform event stream and event bus.
//!
//! `WorkflowEvent` is yielded lazily by the orchestrator's execute/resume
//! streams and broadcast to passive observers. All variants are
//! Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provenance::ArtifactRef;
use crate::tool::ErrorClass;

/// Events emitted while a workflow executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// Dispatch started, fresh or from a checkpoint.
    WorkflowStarted {
        workflow_id: Uuid,
        /// Sequence of the checkpoint the run continues from.
        resumed_from: Option<u64>,
    },

    /// A parallel group was handed to the executor.
    GroupDispatched {
        workflow_id: Uuid,
        /// 0-based position of the group in this run.
        group: usize,
        step_ids: Vec<String>,
    },

    /// A step completed successfully.
    StepCompleted {
        workflow_id: Uuid,
        step_id: String,
        output: ArtifactRef,
        attempts: u32,
        duration_ms: u64,
    },

    /// A step failed after its final attempt.
    StepFailed {
        workflow_id: Uuid,
        step_id: String,
        classification: ErrorClass,
        error: String,
        optional: bool,
        attempts: u32,
    },

    /// A checkpoint was durably written.
    CheckpointWritten { workflow_id: Uuid, sequence: u64 },

    /// The run stopped at a group boundary because pause was requested.
    WorkflowPaused { workflow_id: Uuid },

    /// Every non-optional step completed.
    WorkflowCompleted {
        workflow_id: Uuid,
        /// Optional steps that failed along the way.
        failed_optional: Vec<String>,
    },

    /// A non-optional step failed; no further groups are dispatched.
    WorkflowFailed {
        workflow_id: Uuid,
        step_id: String,
        classification: ErrorClass,
        error: String,
    },
}

impl WorkflowEvent {
    pub fn workflow_id(&self) -> Uuid {
        match self {
            WorkflowEvent::WorkflowStarted { workflow_id, .. }
            | WorkflowEvent::GroupDispatched { workflow_id, .. }
            | WorkflowEvent::StepCompleted { workflow_id, .. }
            | WorkflowEvent::StepFailed { workflow_id, .. }
            | WorkflowEvent::CheckpointWritten { workflow_id, .. }
            | WorkflowEvent::WorkflowPaused { workflow_id }
            | WorkflowEvent::WorkflowCompleted { workflow_id, .. }
            | WorkflowEvent::WorkflowFailed { workflow_id, .. } => *workflow_id,
        }
    }

    /// Whether this event ends a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::WorkflowPaused { .. }
                | WorkflowEvent::WorkflowCompleted { .. }
                | WorkflowEvent::WorkflowFailed { .. }
        )
    }
}
