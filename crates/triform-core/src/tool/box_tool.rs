//! BoxTool -- object-safe dynamic dispatch wrapper for `Tool`.
//!
//! Same blanket-impl pattern as the other `Box*` wrappers:
//! 1. Define an object-safe `ToolDyn` trait with boxed futures
//! 2. Blanket-impl `ToolDyn` for all `T: Tool`
//! 3. `BoxTool` wraps `Box<dyn ToolDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use triform_types::tool::{ToolDescriptor, ToolOutput};

use super::ToolError;
use super::contract::Tool;

/// Object-safe version of [`Tool`] with boxed futures.
pub trait ToolDyn: Send + Sync {
    fn descriptor_dyn(&self) -> ToolDescriptor;

    fn input_schema_dyn(&self) -> Value;

    fn output_schema_dyn(&self) -> Value;

    fn execute_boxed<'a>(
        &'a self,
        input: Value,
        options: Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;
}

/// Blanket implementation: any `Tool` automatically implements `ToolDyn`.
impl<T: Tool> ToolDyn for T {
    fn descriptor_dyn(&self) -> ToolDescriptor {
        self.descriptor()
    }

    fn input_schema_dyn(&self) -> Value {
        self.input_schema()
    }

    fn output_schema_dyn(&self) -> Value {
        self.output_schema()
    }

    fn execute_boxed<'a>(
        &'a self,
        input: Value,
        options: Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>> {
        Box::pin(self.execute(input, options))
    }
}

/// Type-erased tool, stored in the [`ToolRegistry`](super::ToolRegistry).
pub struct BoxTool {
    inner: Box<dyn ToolDyn>,
    descriptor: ToolDescriptor,
}

impl BoxTool {
    pub fn new<T: Tool + 'static>(tool: T) -> Self {
        let descriptor = tool.descriptor();
        Self {
            inner: Box::new(tool),
            descriptor,
        }
    }

    /// Cached descriptor, captured at registration.
    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    pub fn input_schema(&self) -> Value {
        self.inner.input_schema_dyn()
    }

    pub fn output_schema(&self) -> Value {
        self.inner.output_schema_dyn()
    }

    pub async fn execute(&self, input: Value, options: Value) -> Result<ToolOutput, ToolError> {
        self.inner.execute_boxed(input, options).await
    }
}

impl std::fmt::Debug for BoxTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTool")
            .field("id", &self.descriptor.id)
            .field("version", &self.descriptor.version.to_string())
            .finish()
    }
}
