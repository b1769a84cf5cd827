//! The uniform tool contract.

use serde_json::Value;
use triform_types::tool::{ToolDescriptor, ToolOutput};

use super::ToolError;

/// A capability the engine can invoke as a workflow step.
///
/// Implementations are opaque to the engine: extraction models, statistical
/// engines, storage adapters. Uses RPITIT (native async fn in traits, Rust
/// 2024 edition). For dynamic dispatch, see [`BoxTool`](super::BoxTool).
pub trait Tool: Send + Sync {
    /// Identity and version of this tool.
    fn descriptor(&self) -> ToolDescriptor;

    /// JSON Schema of the `input_data` object.
    fn input_schema(&self) -> Value;

    /// JSON Schema of the `data` field of a successful output.
    fn output_schema(&self) -> Value;

    /// Run the tool once.
    ///
    /// `options` carries the step's options plus a `_context` object with
    /// `workflow_id`, `step_id`, and `attempt`.
    fn execute(
        &self,
        input: Value,
        options: Value,
    ) -> impl std::future::Future<Output = Result<ToolOutput, ToolError>> + Send;
}
