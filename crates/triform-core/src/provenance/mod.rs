//! Provenance: append-only operation records, lineage, reproducibility.
//!
//! - `recorder` -- `ProvenanceRecorder` over any `ProvenanceLedger`

pub mod recorder;

pub use recorder::{OperationRecord, ProvenanceError, ProvenanceRecorder};
