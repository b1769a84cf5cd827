//! Representation store trait.

use std::sync::Arc;

use triform_types::error::RepositoryError;
use triform_types::representation::Representation;
use uuid::Uuid;

/// Storage for graph/table/vector representations.
pub trait RepresentationStore: Send + Sync {
    /// Insert or replace a representation by id.
    fn save(
        &self,
        representation: &Representation,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load a representation by id.
    fn load(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Representation>, RepositoryError>> + Send;
}

impl<T: RepresentationStore> RepresentationStore for Arc<T> {
    fn save(
        &self,
        representation: &Representation,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send {
        (**self).save(representation)
    }

    fn load(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Representation>, RepositoryError>> + Send {
        (**self).load(id)
    }
}
