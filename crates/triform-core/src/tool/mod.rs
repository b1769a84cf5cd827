//! Tool contract, dynamic dispatch wrapper, registry, and built-in tools.
//!
//! - `contract` -- the `Tool` trait every capability implements
//! - `box_tool` -- object-safe `BoxTool` wrapper for heterogeneous storage
//! - `registry` -- static id -> tool mapping, validated at workflow creation
//! - `builtin` -- deterministic tools shipped with the engine

pub mod box_tool;
pub mod builtin;
pub mod contract;
pub mod registry;

use thiserror::Error;
use triform_types::tool::ErrorClass;

pub use box_tool::BoxTool;
pub use contract::Tool;
pub use registry::ToolRegistry;

/// A failed tool invocation, classified for retry.
#[derive(Debug, Clone, Error)]
#[error("{class} tool error: {message}")]
pub struct ToolError {
    pub class: ErrorClass,
    pub message: String,
}

impl ToolError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Retryable,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Fatal,
            message: message.into(),
        }
    }

    /// Invalid input is never fixed by retrying.
    pub fn invalid_input(err: impl std::fmt::Display) -> Self {
        Self::fatal(format!("invalid input: {err}"))
    }
}
