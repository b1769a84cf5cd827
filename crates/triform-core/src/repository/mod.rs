//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (triform-infra) implements. The core crate never depends on any specific
//! storage technology. In-memory adapters for every port live in [`memory`].
//!
//! Writes to distinct ports are not atomic with respect to each other. Every
//! write is an idempotent upsert or an append keyed by a fresh id, so a
//! caller may retry after a partial failure.

pub mod artifact;
pub mod checkpoint;
pub mod memory;
pub mod provenance;
pub mod representation;
