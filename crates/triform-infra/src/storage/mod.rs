//! Filesystem storage adapters.
//!
//! Implements the `ArtifactStore` and `RepresentationStore` ports from
//! `triform-core` as plain JSON files under the data directory. Every write
//! goes to a temporary sibling first and is renamed into place, so readers
//! never observe a partially written file.

use std::path::Path;

use triform_types::error::RepositoryError;
use uuid::Uuid;

pub mod artifacts;
pub mod representation;

pub use artifacts::FsArtifactStore;
pub use representation::FsRepresentationStore;

/// Write `bytes` to `path` via a temporary file in the same directory.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), RepositoryError> {
    let Some(dir) = path.parent() else {
        return Err(RepositoryError::Io(format!(
            "path has no parent directory: {}",
            path.display()
        )));
    };
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| RepositoryError::Io(format!("failed to create {}: {e}", dir.display())))?;

    let tmp = dir.join(format!(".tmp-{}", Uuid::now_v7().simple()));
    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(RepositoryError::Io(format!("failed to write {}: {e}", tmp.display())));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(RepositoryError::Io(format!(
            "failed to move {} into place: {e}",
            path.display()
        )));
    }
    Ok(())
}

/// Read a file, mapping "not found" to `None`.
pub(crate) async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, RepositoryError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RepositoryError::Io(format!(
            "failed to read {}: {e}",
            path.display()
        ))),
    }
}
