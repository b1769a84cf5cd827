//! Shared domain types for Triform.
//!
//! This crate contains the data model of the Triform workflow engine:
//! workflow definitions and step state, the tool contract values, provenance
//! records, checkpoints, graph/table/vector representations, mode selection,
//! execution events, and engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, semver,
//! schemars, thiserror.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod event;
pub mod mode;
pub mod provenance;
pub mod representation;
pub mod tool;
pub mod workflow;
