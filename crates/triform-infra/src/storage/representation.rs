//! Representation files, one JSON document per representation id.

use std::path::PathBuf;

use triform_core::repository::representation::RepresentationStore;
use triform_types::error::RepositoryError;
use triform_types::representation::Representation;
use uuid::Uuid;

use super::{read_optional, write_atomic};

/// Filesystem-backed `RepresentationStore` rooted at `{root}/{id}.json`.
pub struct FsRepresentationStore {
    root: PathBuf,
}

impl FsRepresentationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, id: &Uuid) -> PathBuf {
        self.root.join(format!("{}.json", id.simple()))
    }
}

impl RepresentationStore for FsRepresentationStore {
    async fn save(&self, representation: &Representation) -> Result<(), RepositoryError> {
        let bytes = serde_json::to_vec_pretty(representation)?;
        write_atomic(&self.path_for(&representation.id), &bytes).await
    }

    async fn load(&self, id: &Uuid) -> Result<Option<Representation>, RepositoryError> {
        match read_optional(&self.path_for(id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
