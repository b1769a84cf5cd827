//! Workflow domain types for Triform.
//!
//! Defines the canonical workflow definition (the declarative document callers
//! submit), per-step execution state, and the retry policy attached to steps.
//! Definitions are immutable once registered: a changed document is a new
//! workflow with a new id.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provenance::ArtifactRef;
use crate::tool::ErrorClass;

// ---------------------------------------------------------------------------
// Workflow Definition (declarative document)
// ---------------------------------------------------------------------------

/// The canonical workflow definition.
///
/// YAML and JSON documents both deserialize into this struct. When `id` is
/// omitted (nil), it is derived from the definition's content hash at parse
/// time so that identical documents address the same workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow id. Nil until assigned.
    #[serde(default = "Uuid::nil", skip_serializing_if = "Uuid::is_nil")]
    pub id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    /// Definition version string (informational; a new version gets a new id).
    #[serde(default = "default_version")]
    pub version: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered list of steps. The position of a step is its arena index.
    pub steps: Vec<StepDefinition>,
    /// Extensible metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl WorkflowDefinition {
    /// Explicit dependency map: step id -> prerequisite step ids.
    pub fn dependency_map(&self) -> BTreeMap<&str, Vec<&str>> {
        self.steps
            .iter()
            .map(|s| {
                (
                    s.id.as_str(),
                    s.depends_on.iter().map(String::as_str).collect(),
                )
            })
            .collect()
    }

    /// Look up a step's arena index by id.
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    /// Look up a step by id.
    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A single step in the workflow DAG: one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// User-defined step ID (e.g. "load-corpus"). Unique within a workflow.
    pub id: String,
    /// Human-readable step name (defaults to the id for display).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Registered tool identifier.
    pub tool: String,
    /// Optional semver requirement pinning the tool version (e.g. "=1.2.0").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<semver::VersionReq>,
    /// Named input bindings, resolved into the tool's `input_data` object.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, InputBinding>,
    /// Step IDs this step depends on (DAG edges).
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional steps may fail without failing the workflow.
    #[serde(default)]
    pub optional: bool,
    /// Step-level timeout in seconds (overrides the engine default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Retry configuration (overrides the engine default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// How an `Ok` tool output carrying `status: error` is classified.
    #[serde(default = "default_error_status_class")]
    pub on_error_status: ErrorClass,
    /// Free-form options forwarded to the tool.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub options: serde_json::Value,
}

fn default_error_status_class() -> ErrorClass {
    ErrorClass::Fatal
}

impl StepDefinition {
    /// Display name: explicit name or the step id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Step IDs referenced by this step's input bindings.
    pub fn referenced_steps(&self) -> impl Iterator<Item = &str> {
        self.inputs.values().filter_map(|b| match b {
            InputBinding::Reference { step, .. } => Some(step.as_str()),
            InputBinding::Literal { .. } => None,
        })
    }
}

/// An input binding: a literal value or a reference to a prior step's output.
///
/// ```yaml
/// inputs:
///   threshold: { kind: literal, value: 0.3 }
///   table: { kind: reference, step: correlate, field: data }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputBinding {
    /// A literal JSON value.
    Literal { value: serde_json::Value },
    /// The output of another step, optionally narrowed by a dot path.
    Reference {
        step: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Retry Configuration
// ---------------------------------------------------------------------------

/// Retry configuration for a workflow step (exponential backoff).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Growth factor applied per attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution Status
// ---------------------------------------------------------------------------

/// Overall status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl WorkflowStatus {
    /// Completed and Failed are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

/// Status of an individual step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

impl StepStatus {
    /// Completed and Failed are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }

    /// Whether moving from `self` to `next` is allowed within a run.
    ///
    /// Transitions only move forward, except that a Paused step may return
    /// to Pending on explicit resume.
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Paused)
                | (Paused, Pending)
                | (Running, Completed)
                | (Running, Failed)
        )
    }
}

/// Failure details attached to a failed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub classification: ErrorClass,
    pub message: String,
    /// True when a retryable error exhausted the attempt budget.
    #[serde(default)]
    pub retries_exhausted: bool,
}

/// Execution state of one step. Indexed by the step's arena index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ArtifactRef>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepState {
    /// Fresh pending state for a step.
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            error: None,
            output: None,
            attempts: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Inspectable state of a workflow: overall status plus per-step states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: Uuid,
    pub status: WorkflowStatus,
    /// One entry per step, in definition order.
    pub steps: Vec<StepState>,
    /// Sequence number of the last checkpoint written for this workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Initial state for a freshly registered definition.
    pub fn new(definition: &WorkflowDefinition) -> Self {
        Self {
            workflow_id: definition.id,
            status: WorkflowStatus::Pending,
            steps: definition
                .steps
                .iter()
                .map(|s| StepState::pending(s.id.clone()))
                .collect(),
            last_checkpoint: None,
            updated_at: Utc::now(),
        }
    }

    /// Per-step statuses keyed by step id.
    pub fn statuses(&self) -> HashMap<&str, StepStatus> {
        self.steps
            .iter()
            .map(|s| (s.step_id.as_str(), s.status))
            .collect()
    }

    /// Number of steps in the given status.
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
