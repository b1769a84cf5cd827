//! Workflow definition parsing, validation, and content addressing.
//!
//! Converts YAML or JSON documents into the canonical `WorkflowDefinition`,
//! validates structural constraints (unique IDs, known dependencies, bindings
//! that only reference prerequisites, sane retry policies), and derives the
//! content-based workflow id and definition hash.

use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;
use triform_types::workflow::{InputBinding, WorkflowDefinition};
use uuid::Uuid;

use super::dag::get_step_dependencies;
use crate::hash::{canonical_json, content_uuid, sha256_hex};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while building or validating a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Dependency graph contains a cycle.
    #[error("cycle detected involving step '{step}' ({})", cycle.join(" -> "))]
    CycleDetected { step: String, cycle: Vec<String> },

    /// A step references an unknown dependency.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    /// A step references a tool id that is not registered.
    #[error("step '{step}' references unregistered tool '{tool}'")]
    UnknownTool { step: String, tool: String },

    /// A step pins a version the registered tool does not satisfy.
    #[error("step '{step}' requires {tool} {required}, registered version is {registered}")]
    ToolVersionMismatch {
        step: String,
        tool: String,
        required: String,
        registered: String,
    },

    /// A workflow id is already registered with a different definition.
    #[error("workflow {0} already exists with a different definition")]
    Immutable(Uuid),

    /// An input binding could not be resolved at run time.
    #[error("binding error: {0}")]
    BindingError(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
///
/// Runs `validate_definition` after deserialization and assigns the content
/// id when the document carries none.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    finish(def)
}

/// Parse a JSON string into a validated `WorkflowDefinition`.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_json::from_str(json).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    finish(def)
}

fn finish(mut def: WorkflowDefinition) -> Result<WorkflowDefinition, WorkflowError> {
    validate_definition(&def)?;
    if def.id.is_nil() {
        def.id = content_id(&def)?;
    }
    Ok(def)
}

/// Load a workflow definition from a file. `.json` files are parsed as JSON,
/// everything else as YAML.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_workflow_json(&content),
        _ => parse_workflow_yaml(&content),
    }
}

// ---------------------------------------------------------------------------
// Content addressing
// ---------------------------------------------------------------------------

/// Deterministic workflow id derived from the definition's content.
///
/// The id field itself is excluded, so a document hashes the same whether or
/// not an id was already assigned from it.
pub fn content_id(def: &WorkflowDefinition) -> Result<Uuid, WorkflowError> {
    let mut unassigned = def.clone();
    unassigned.id = Uuid::nil();
    let bytes =
        canonical_json(&unassigned).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    Ok(content_uuid(&bytes))
}

/// Hash of the full definition (including its id), recorded in checkpoints.
pub fn definition_hash(def: &WorkflowDefinition) -> Result<String, WorkflowError> {
    let bytes = canonical_json(def).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    Ok(sha256_hex(&bytes))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty
/// - At least one step exists
/// - All step IDs are non-empty and unique
/// - All `depends_on` references point to existing step IDs
/// - Reference bindings target a (transitive) prerequisite of the step
/// - Retry `max_attempts >= 1` and `multiplier >= 1.0` if set
/// - Timeout > 0 if set
///
/// Acyclicity and tool registration are checked by the resolver and the
/// tool registry respectively.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.name.trim().is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }

    if def.steps.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow must have at least one step".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for step in &def.steps {
        if step.id.trim().is_empty() {
            return Err(WorkflowError::ValidationError(
                "step ID must not be empty".to_string(),
            ));
        }
        if !seen_ids.insert(step.id.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
    }

    for step in &def.steps {
        for dep in &step.depends_on {
            if !seen_ids.contains(dep.as_str()) {
                return Err(WorkflowError::UnknownDependency(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                )));
            }
        }
    }

    for step in &def.steps {
        let prerequisites: HashSet<&str> = get_step_dependencies(&step.id, &def.steps)
            .into_iter()
            .collect();
        for (name, binding) in &step.inputs {
            if let InputBinding::Reference { step: target, .. } = binding {
                if !prerequisites.contains(target.as_str()) {
                    return Err(WorkflowError::ValidationError(format!(
                        "input '{}' of step '{}' references '{}', which is not a prerequisite",
                        name, step.id, target
                    )));
                }
            }
        }

        if let Some(retry) = &step.retry {
            if retry.max_attempts < 1 {
                return Err(WorkflowError::ValidationError(format!(
                    "step '{}': retry max_attempts must be >= 1",
                    step.id
                )));
            }
            if retry.multiplier.is_nan() || retry.multiplier < 1.0 {
                return Err(WorkflowError::ValidationError(format!(
                    "step '{}': retry multiplier must be >= 1.0",
                    step.id
                )));
            }
        }

        if step.timeout_secs == Some(0) {
            return Err(WorkflowError::ValidationError(format!(
                "step '{}': timeout must be > 0",
                step.id
            )));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE: &str = r#"
name: correlation-study
steps:
  - id: load
    tool: data.literal
    inputs:
      value: { kind: literal, value: [1, 2, 3] }
  - id: correlate
    tool: stats.correlation
    depends_on: [load]
    inputs:
      table: { kind: reference, step: load }
  - id: graph
    tool: representation.convert
    depends_on: [correlate]
    inputs:
      representation: { kind: reference, step: load }
"#;

    #[test]
    fn test_parse_assigns_content_id() {
        let def = parse_workflow_yaml(PIPELINE).unwrap();
        assert!(!def.id.is_nil());
        let again = parse_workflow_yaml(PIPELINE).unwrap();
        assert_eq!(def.id, again.id, "same document -> same id");
    }

    #[test]
    fn test_changed_document_changes_id() {
        let def = parse_workflow_yaml(PIPELINE).unwrap();
        let changed = parse_workflow_yaml(&PIPELINE.replace("[1, 2, 3]", "[1, 2, 4]")).unwrap();
        assert_ne!(def.id, changed.id);
    }

    #[test]
    fn test_explicit_id_kept() {
        let yaml = format!("id: \"01938e90-0000-7000-8000-000000000001\"\n{PIPELINE}");
        let def = parse_workflow_yaml(&yaml).unwrap();
        assert_eq!(def.id.to_string(), "01938e90-0000-7000-8000-000000000001");
    }

    #[test]
    fn test_content_id_ignores_assigned_id() {
        let def = parse_workflow_yaml(PIPELINE).unwrap();
        assert_eq!(content_id(&def).unwrap(), def.id);
    }

    #[test]
    fn test_json_document() {
        let json = r#"{
            "name": "one-step",
            "steps": [{"id": "a", "tool": "data.literal"}]
        }"#;
        let def = parse_workflow_json(json).unwrap();
        assert_eq!(def.steps.len(), 1);
        assert_eq!(def.version, "1.0.0");
    }

    #[test]
    fn test_transitive_reference_is_allowed() {
        // `graph` references `load` through `correlate`.
        assert!(parse_workflow_yaml(PIPELINE).is_ok());
    }

    #[test]
    fn test_reference_to_non_prerequisite_rejected() {
        let yaml = r#"
name: bad-ref
steps:
  - id: a
    tool: data.literal
  - id: b
    tool: data.literal
    inputs:
      x: { kind: reference, step: a }
"#;
        let err = parse_workflow_yaml(yaml).unwrap_err();
        assert!(matches!(err, WorkflowError::ValidationError(_)));
        assert!(err.to_string().contains("not a prerequisite"));
    }

    #[test]
    fn test_duplicate_step_ids_rejected() {
        let yaml = r#"
name: dupes
steps:
  - { id: a, tool: data.literal }
  - { id: a, tool: data.literal }
"#;
        let err = parse_workflow_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate step ID"));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let yaml = r#"
name: unknown
steps:
  - { id: a, tool: data.literal, depends_on: [ghost] }
"#;
        let err = parse_workflow_yaml(yaml).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownDependency(_)));
    }

    #[test]
    fn test_empty_steps_rejected() {
        let err = parse_workflow_yaml("name: empty\nsteps: []\n").unwrap_err();
        assert!(err.to_string().contains("at least one step"));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let yaml = r#"
name: retry
steps:
  - id: a
    tool: data.literal
    retry: { max_attempts: 0 }
"#;
        let err = parse_workflow_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = parse_workflow_yaml("name: [unclosed").unwrap_err();
        assert!(matches!(err, WorkflowError::ParseError(_)));
    }

    #[test]
    fn test_definition_hash_stable_and_sensitive() {
        let def = parse_workflow_yaml(PIPELINE).unwrap();
        assert_eq!(definition_hash(&def).unwrap(), definition_hash(&def).unwrap());
        let mut other = def.clone();
        other.steps[0].optional = true;
        assert_ne!(definition_hash(&def).unwrap(), definition_hash(&other).unwrap());
    }

    #[test]
    fn test_load_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml_path = dir.path().join("flow.yaml");
        std::fs::write(&yaml_path, PIPELINE).unwrap();
        let def = load_workflow_file(&yaml_path).unwrap();

        let json_path = dir.path().join("flow.json");
        std::fs::write(&json_path, serde_json::to_string(&def).unwrap()).unwrap();
        let from_json = load_workflow_file(&json_path).unwrap();
        assert_eq!(def, from_json);
    }
}
