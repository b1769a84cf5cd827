//! Content-addressed artifact store trait.

use std::sync::Arc;

use serde_json::Value;
use triform_types::error::RepositoryError;

/// Storage for step outputs and input bundles, keyed by content hash.
///
/// `put` is idempotent: storing the same value twice yields the same hash
/// and leaves one copy. Uses RPITIT (native async fn in traits).
pub trait ArtifactStore: Send + Sync {
    /// Store a value and return its SHA-256 hex address.
    fn put(
        &self,
        value: &Value,
    ) -> impl std::future::Future<Output = Result<String, RepositoryError>> + Send;

    /// Fetch a value by address.
    fn get(
        &self,
        hash: &str,
    ) -> impl std::future::Future<Output = Result<Option<Value>, RepositoryError>> + Send;

    /// Whether an address resolves.
    fn contains(
        &self,
        hash: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}

impl<T: ArtifactStore> ArtifactStore for Arc<T> {
    fn put(
        &self,
        value: &Value,
    ) -> impl std::future::Future<Output = Result<String, RepositoryError>> + Send {
        (**self).put(value)
    }

    fn get(
        &self,
        hash: &str,
    ) -> impl std::future::Future<Output = Result<Option<Value>, RepositoryError>> + Send {
        (**self).get(hash)
    }

    fn contains(
        &self,
        hash: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send {
        (**self).contains(hash)
    }
}
