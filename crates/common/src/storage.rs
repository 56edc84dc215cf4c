//! Sandboxed blob storage
//!
//! All persisted state (snapshots, baselines, artifacts) lives under a
//! single root directory. Relative paths are resolved against that root and
//! anything that would land outside it is rejected before touching disk.

use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Directory-scoped blob store
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write (or replace) a blob
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Write a blob that must not exist yet
    async fn write_new(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read a blob, `Error::NotFound` when absent
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// List entry names directly under `dir`, sorted
    async fn list(&self, dir: &str) -> Result<Vec<String>>;

    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Filesystem-backed blob store rooted at one directory
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (creating if needed) a store at `root`
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(".tmp")).await?;
        let root = fs::canonicalize(&root).await?;
        debug!("Opened blob store at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative blob path inside the root.
    ///
    /// Rejects absolute paths, `..` segments, and paths whose nearest
    /// existing ancestor resolves (through symlinks) outside the root.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf> {
        let escape = || Error::Containment {
            path: rel.to_string(),
        };

        if rel.is_empty() {
            return Err(escape());
        }

        let mut resolved = self.root.clone();
        for component in Path::new(rel).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(escape());
                }
            }
        }

        // Symlinks inside the root could still point elsewhere
        let mut ancestor = resolved.as_path();
        while !ancestor.exists() {
            match ancestor.parent() {
                Some(parent) => ancestor = parent,
                None => return Err(escape()),
            }
        }
        let real = std::fs::canonicalize(ancestor)?;
        if !real.starts_with(&self.root) {
            return Err(escape());
        }

        Ok(resolved)
    }

    fn tmp_path(&self) -> PathBuf {
        self.root
            .join(".tmp")
            .join(format!("{}.tmp", uuid::Uuid::new_v4()))
    }

    async fn stage(&self, target: &Path, bytes: &[u8]) -> Result<PathBuf> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.tmp_path();
        fs::write(&tmp, bytes).await?;
        Ok(tmp)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        let tmp = self.stage(&target, bytes).await?;
        fs::rename(&tmp, &target).await?;
        debug!("Wrote blob {} ({} bytes)", path, bytes.len());
        Ok(())
    }

    async fn write_new(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        let tmp = self.stage(&target, bytes).await?;

        // hard_link fails if the target exists, which keeps this atomic
        let linked = fs::hard_link(&tmp, &target).await;
        let _ = fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => {
                debug!("Wrote new blob {} ({} bytes)", path, bytes.len());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(Error::AlreadyExists {
                kind: "blob".to_string(),
                id: path.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.resolve(path)?;
        match fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::not_found("blob", path)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let target = self.resolve(dir)?;
        let mut names = Vec::new();

        if !target.is_dir() {
            return Ok(names);
        }

        let mut entries = fs::read_dir(&target).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path)?.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_list() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::open(tmp.path()).await.unwrap();

        store.write("sites/a/one.json", b"1").await.unwrap();
        store.write("sites/a/two.json", b"2").await.unwrap();

        assert_eq!(store.read("sites/a/one.json").await.unwrap(), b"1");
        assert_eq!(
            store.list("sites/a").await.unwrap(),
            vec!["one.json".to_string(), "two.json".to_string()]
        );
        assert!(store.list("sites/missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::open(tmp.path()).await.unwrap();

        let err = store.read("nope.json").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_escaping_paths_rejected_before_write() {
        let tmp = TempDir::new().unwrap();
        let inner = tmp.path().join("root");
        let store = FsBlobStore::open(&inner).await.unwrap();

        for bad in ["../outside.json", "/etc/passwd", "a/../../b", ""] {
            let err = store.write(bad, b"x").await.unwrap_err();
            assert!(matches!(err, Error::Containment { .. }), "{} accepted", bad);
        }
        assert!(!tmp.path().join("outside.json").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_rejected() {
        let tmp = TempDir::new().unwrap();
        let outside = tmp.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        let store = FsBlobStore::open(tmp.path().join("root")).await.unwrap();
        std::os::unix::fs::symlink(&outside, store.root().join("link")).unwrap();

        let err = store.write("link/file.json", b"x").await.unwrap_err();
        assert!(matches!(err, Error::Containment { .. }));
        assert!(!outside.join("file.json").exists());
    }

    #[tokio::test]
    async fn test_write_new_never_overwrites() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::open(tmp.path()).await.unwrap();

        store.write_new("snap.json", b"first").await.unwrap();
        let err = store.write_new("snap.json", b"second").await.unwrap_err();

        assert!(matches!(err, Error::AlreadyExists { .. }));
        assert_eq!(store.read("snap.json").await.unwrap(), b"first");
    }
}
