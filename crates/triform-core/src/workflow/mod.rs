//! Workflow engine core: definition parsing, DAG resolution, execution, and
//! durable checkpointing.
//!
//! - `definition` -- YAML/JSON parsing, validation, content ids
//! - `dag` -- Kahn resolver producing parallel groups, cycle detection
//! - `context` -- step outputs and input-binding resolution
//! - `retry` -- retry decision and exponential backoff
//! - `executor` -- bounded-concurrency step execution with provenance
//! - `checkpoint` -- checkpoint writes, retention, restore
//! - `orchestrator` -- create/execute/pause/resume/state

pub mod checkpoint;
pub mod context;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod orchestrator;
pub mod retry;

pub use orchestrator::{EventStream, Orchestrator, OrchestratorError};
