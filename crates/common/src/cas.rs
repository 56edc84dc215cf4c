//! Content-addressed artifact storage
//!
//! Failure screenshots are stored by their SHA-256 digest inside the blob
//! store, which gives deduplication and integrity verification on read.

use crate::{BlobStore, Error, Result};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// Content-addressed store for run artifacts
#[derive(Clone)]
pub struct ArtifactStore {
    blobs: Arc<dyn BlobStore>,
}

impl ArtifactStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Compute SHA-256 hash of data
    pub fn hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Blob path for an artifact digest
    pub fn object_path(digest: &str) -> String {
        // First 2 chars as subdirectory for sharding
        let (prefix, _) = digest.split_at(2.min(digest.len()));
        format!("artifacts/sha256/{}/{}", prefix, digest)
    }

    /// Store data and return its digest
    pub async fn put(&self, data: &[u8]) -> Result<String> {
        let digest = Self::hash(data);
        let path = Self::object_path(&digest);

        match self.blobs.write_new(&path, data).await {
            Ok(()) => {
                debug!("Stored artifact {} ({} bytes)", digest, data.len());
                Ok(digest)
            }
            Err(Error::AlreadyExists { .. }) => {
                debug!("Artifact {} already exists", digest);
                Ok(digest)
            }
            Err(e) => Err(e),
        }
    }

    /// Get data by digest, verifying integrity
    pub async fn get(&self, digest: &str) -> Result<Vec<u8>> {
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Validation(format!("not a sha256 digest: {}", digest)));
        }

        let data = self.blobs.read(&Self::object_path(digest)).await?;

        let actual_digest = Self::hash(&data);
        if actual_digest != digest {
            return Err(Error::IntegrityError(format!(
                "Digest mismatch: expected {}, got {}",
                digest, actual_digest
            )));
        }

        Ok(data)
    }

    pub async fn has(&self, digest: &str) -> Result<bool> {
        self.blobs.exists(&Self::object_path(digest)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FsBlobStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get() {
        let tmp = TempDir::new().unwrap();
        let blobs = Arc::new(FsBlobStore::open(tmp.path()).await.unwrap());
        let store = ArtifactStore::new(blobs);

        let data = b"png bytes";
        let digest = store.put(data).await.unwrap();

        assert!(store.has(&digest).await.unwrap());
        assert_eq!(store.get(&digest).await.unwrap(), data.to_vec());
    }

    #[tokio::test]
    async fn test_deduplication() {
        let tmp = TempDir::new().unwrap();
        let blobs = Arc::new(FsBlobStore::open(tmp.path()).await.unwrap());
        let store = ArtifactStore::new(blobs);

        let d1 = store.put(b"same").await.unwrap();
        let d2 = store.put(b"same").await.unwrap();
        assert_eq!(d1, d2);
    }

    #[tokio::test]
    async fn test_integrity_check() {
        let tmp = TempDir::new().unwrap();
        let fs_store = FsBlobStore::open(tmp.path()).await.unwrap();
        let store = ArtifactStore::new(Arc::new(fs_store.clone()));

        let digest = store.put(b"original").await.unwrap();

        // Corrupt the object in place
        fs_store
            .write(&ArtifactStore::object_path(&digest), b"corrupted")
            .await
            .unwrap();

        assert!(matches!(
            store.get(&digest).await,
            Err(Error::IntegrityError(_))
        ));
    }
}
