//! Static tool registry.
//!
//! Populated once at startup and then shared read-only (behind an `Arc`)
//! by the executor and orchestrator, so lookups need no locking.

use std::collections::BTreeMap;
use std::sync::Arc;

use triform_types::tool::ToolDescriptor;
use triform_types::workflow::WorkflowDefinition;

use super::box_tool::BoxTool;
use super::contract::Tool;
use crate::workflow::definition::WorkflowError;

/// Mapping from tool id to implementation.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<BoxTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its descriptor id, replacing any previous one.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> &mut Self {
        let boxed = BoxTool::new(tool);
        let id = boxed.descriptor().id.clone();
        if self.tools.insert(id.clone(), Arc::new(boxed)).is_some() {
            tracing::warn!(tool = %id, "tool registered twice; keeping the later one");
        }
        self
    }

    /// Builder-style registration.
    pub fn with<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<BoxTool>> {
        self.tools.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tools.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Fail fast on steps that reference unregistered tools or pin a version
    /// the registered tool does not satisfy.
    pub fn validate_workflow(&self, def: &WorkflowDefinition) -> Result<(), WorkflowError> {
        for step in &def.steps {
            let tool = self.get(&step.tool).ok_or_else(|| WorkflowError::UnknownTool {
                step: step.id.clone(),
                tool: step.tool.clone(),
            })?;
            if let Some(required) = &step.tool_version {
                let registered = &tool.descriptor().version;
                if !required.matches(registered) {
                    return Err(WorkflowError::ToolVersionMismatch {
                        step: step.id.clone(),
                        tool: step.tool.clone(),
                        required: required.to_string(),
                        registered: registered.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
