//! Execution context: step outputs and input-binding resolution.
//!
//! `WorkflowContext` holds the output data of every completed step in a run.
//! Before a step is dispatched its input bindings are resolved against the
//! context into a single JSON object that becomes the tool's `input_data`.

use std::collections::HashMap;

use serde_json::{Map, Value};
use triform_types::workflow::{InputBinding, StepDefinition};
use uuid::Uuid;

use super::definition::WorkflowError;

/// Step outputs accumulated during one workflow run.
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    pub workflow_id: Uuid,
    /// Output data keyed by step ID.
    step_outputs: HashMap<String, Value>,
}

impl WorkflowContext {
    pub fn new(workflow_id: Uuid) -> Self {
        Self {
            workflow_id,
            step_outputs: HashMap::new(),
        }
    }

    /// Store the output data of a completed step.
    pub fn set_step_output(&mut self, step_id: &str, output: Value) {
        self.step_outputs.insert(step_id.to_string(), output);
    }

    /// Get the output data of a completed step.
    pub fn get_step_output(&self, step_id: &str) -> Option<&Value> {
        self.step_outputs.get(step_id)
    }

    /// Resolve a step's bindings into its `input_data` object.
    ///
    /// A reference to a step without output (a failed optional prerequisite)
    /// resolves to `null`. A `field` path that does not exist in a present
    /// output is a binding error.
    pub fn resolve_inputs(&self, step: &StepDefinition) -> Result<Value, WorkflowError> {
        let mut resolved = Map::new();
        for (name, binding) in &step.inputs {
            let value = match binding {
                InputBinding::Literal { value } => value.clone(),
                InputBinding::Reference { step: source, field } => {
                    match self.step_outputs.get(source) {
                        None => Value::Null,
                        Some(output) => match field {
                            None => output.clone(),
                            Some(path) => lookup_path(output, path).cloned().ok_or_else(|| {
                                WorkflowError::BindingError(format!(
                                    "input '{}' of step '{}': field '{}' not found in output of '{}'",
                                    name, step.id, path, source
                                ))
                            })?,
                        },
                    }
                }
            };
            resolved.insert(name.clone(), value);
        }
        Ok(Value::Object(resolved))
    }
}

/// Walk a dot-separated path (`a.b.0.c`) through objects and arrays.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
