//! Infrastructure layer for Triform.
//!
//! Contains implementations of the repository traits defined in `triform-core`:
//! the SQLite provenance ledger and checkpoint store, filesystem artifact and
//! representation stores, and the TOML configuration loader.

pub mod config;
pub mod sqlite;
pub mod storage;
