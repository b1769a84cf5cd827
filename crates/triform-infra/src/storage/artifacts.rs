//! Content-addressed artifact files.
//!
//! Layout:
//! ```text
//! {root}/ab/abcdef....json
//! ```
//! The file name is the SHA-256 of the file's canonical JSON content. Reads
//! re-hash the bytes, so a tampered or truncated file is reported rather
//! than returned.

use std::path::PathBuf;

use serde_json::Value;
use triform_core::hash::{canonical_json, sha256_hex};
use triform_core::repository::artifact::ArtifactStore;
use triform_types::error::RepositoryError;

use super::{read_optional, write_atomic};

/// Filesystem-backed `ArtifactStore`.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Store artifacts under `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path for an address, or `None` when it is not a SHA-256 hex digest.
    fn path_for(&self, hash: &str) -> Option<PathBuf> {
        let valid = hash.len() == 64 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| self.root.join(&hash[..2]).join(format!("{hash}.json")))
    }
}

impl ArtifactStore for FsArtifactStore {
    async fn put(&self, value: &Value) -> Result<String, RepositoryError> {
        let bytes = canonical_json(value)?;
        let hash = sha256_hex(&bytes);
        let Some(path) = self.path_for(&hash) else {
            return Err(RepositoryError::Io(format!("invalid artifact address {hash}")));
        };

        if tokio::fs::try_exists(&path).await? {
            return Ok(hash);
        }
        write_atomic(&path, &bytes).await?;
        tracing::trace!(hash = %hash, bytes = bytes.len(), "artifact stored");
        Ok(hash)
    }

    async fn get(&self, hash: &str) -> Result<Option<Value>, RepositoryError> {
        let Some(path) = self.path_for(hash) else {
            return Ok(None);
        };
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(None);
        };

        if sha256_hex(&bytes) != hash {
            tracing::warn!(hash = %hash, path = %path.display(), "artifact content does not match its address");
            return Err(RepositoryError::Serialization(format!(
                "artifact {hash} is corrupt"
            )));
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn contains(&self, hash: &str) -> Result<bool, RepositoryError> {
        match self.path_for(hash) {
            Some(path) => Ok(tokio::fs::try_exists(&path).await?),
            None => Ok(false),
        }
    }
}
