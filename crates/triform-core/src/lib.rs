//! Business logic and repository trait definitions for Triform.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, plus the engine itself: dependency resolution, step
//! execution, provenance, checkpoints, representation conversion, and mode
//! selection. It depends only on `triform-types` -- never on `triform-infra`
//! or any database/IO crate.

pub mod conversion;
pub mod event;
pub mod hash;
pub mod mode;
pub mod provenance;
pub mod repository;
pub mod tool;
pub mod workflow;
