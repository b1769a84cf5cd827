//! Provenance ledger types.
//!
//! A [`ProvenanceRecord`] describes one executed operation (one attempt of a
//! step, or one standalone conversion) and is never mutated after creation.
//! Artifacts are addressed by the SHA-256 hex digest of their canonical JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::Confidence;

/// Reference to a content-addressed artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// SHA-256 hex digest of the artifact's canonical JSON encoding.
    pub hash: String,
    /// Confidence attached to the artifact by the tool that produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
}

impl ArtifactRef {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Outcome of a recorded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Success,
    Failure,
}

/// One append-only ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Operation name (e.g. "step.execute", "representation.convert").
    pub operation: String,
    pub tool_id: String,
    pub tool_version: semver::Version,
    #[serde(default)]
    pub inputs: Vec<ArtifactRef>,
    #[serde(default)]
    pub outputs: Vec<ArtifactRef>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// 1-based attempt number within the step.
    #[serde(default = "default_attempt")]
    pub attempt: u32,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Ids of the records that last produced this record's inputs.
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
}

fn default_attempt() -> u32 {
    1
}

impl ProvenanceRecord {
    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Success
    }

    pub fn consumes(&self, hash: &str) -> bool {
        self.inputs.iter().any(|r| r.hash == hash)
    }

    pub fn produces(&self, hash: &str) -> bool {
        self.outputs.iter().any(|r| r.hash == hash)
    }
}

// ---------------------------------------------------------------------------
// Lineage
// ---------------------------------------------------------------------------

/// Direction of a lineage walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageDirection {
    /// From an artifact to the operations that produced it, recursively.
    Backward,
    /// From an artifact to the operations that consumed it, recursively.
    Forward,
}

/// Edge in a lineage graph: `to` consumed an output of `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEdge {
    pub from: Uuid,
    pub to: Uuid,
}

/// Result of a bounded lineage walk starting at one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageGraph {
    /// Artifact hash the walk started from.
    pub root: String,
    pub direction: LineageDirection,
    /// Visited records in BFS order, without duplicates.
    pub records: Vec<ProvenanceRecord>,
    pub edges: Vec<LineageEdge>,
    /// True when the depth bound stopped the walk early.
    pub truncated: bool,
}

// ---------------------------------------------------------------------------
// Reproducibility
// ---------------------------------------------------------------------------

/// A concrete reason a workflow may not be reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReproducibilityIssue {
    /// The recorded tool is no longer registered.
    ToolMissing { record_id: Uuid, tool_id: String },
    /// The tool is registered under a different version.
    VersionMismatch {
        record_id: Uuid,
        tool_id: String,
        recorded: String,
        registered: String,
    },
    /// An input artifact can no longer be resolved.
    InputMissing { record_id: Uuid, artifact: String },
    /// The ledger holds nothing for the workflow.
    NoRecords,
}

/// Outcome of a reproducibility audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReproducibilityReport {
    pub workflow_id: Uuid,
    /// 1.0 when fully reproducible, degrading towards 0.0.
    pub score: f64,
    /// Number of individual checks performed.
    pub checks: usize,
    pub issues: Vec<ReproducibilityIssue>,
}

impl ReproducibilityReport {
    pub fn is_reproducible(&self) -> bool {
        self.issues.is_empty()
    }
}
