//! Conversion between graph, table, and vector representations.
//!
//! - `converters` -- the `Converter` trait and the default pairwise strategies
//! - `bridge` -- converter registry, multi-hop path search, enrichment checks

pub mod bridge;
pub mod converters;

use thiserror::Error;
use triform_types::error::RepositoryError;
use triform_types::representation::Mode;
use uuid::Uuid;

pub use bridge::{ConversionBridge, ConversionEdge};
pub use converters::Converter;

/// Errors surfaced by the conversion bridge. A failed call never leaves a
/// partially converted representation behind.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("no conversion path from {from} to {to}")]
    NoPath { from: Mode, to: Mode },

    #[error("converter '{strategy}' rejected its input: {reason}")]
    HopRejected { strategy: String, reason: String },

    #[error("converter '{strategy}' is not enrichment-preserving: {detail}")]
    EnrichmentViolation { strategy: String, detail: String },

    #[error("expected {expected} data, got {actual}")]
    ModeMismatch { expected: Mode, actual: Mode },

    #[error("representation {0} not found")]
    NotFound(Uuid),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}
