//! Plan and log stores.
//!
//! Blobs are keyed by `(kind, id)` and are neither versioned nor branch
//! aware. Plan artifacts and logs are written by exactly one worker
//! invocation. Component state is rewritten by every apply of the component.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Errors raised by a [`BlobStore`].
#[derive(Debug, Error)]
pub enum BlobError {
    /// Nothing has been stored under the key.
    #[error("{kind} blob {id} not found")]
    NotFound {
        /// Blob kind.
        kind: BlobKind,
        /// Operation id.
        id: i64,
    },
    /// Filesystem failure.
    #[error("blob I/O failed at '{path}': {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Source error.
        #[source]
        source: io::Error,
    },
}

/// What a blob holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    /// Binary plan file produced by the executor.
    PlanArtifact,
    /// Executor output captured while planning.
    PlanLog,
    /// Executor output captured while applying.
    ApplyLog,
    /// Executor state file of a component, keyed by component id.
    ComponentState,
}

impl BlobKind {
    /// Directory and file prefix for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlanArtifact => "plan",
            Self::PlanLog => "plan-log",
            Self::ApplyLog => "apply-log",
            Self::ComponentState => "tfstate",
        }
    }
}

impl fmt::Display for BlobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blob persistence for plan artifacts and logs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes `data` under the key, replacing existing content.
    async fn store(&self, kind: BlobKind, id: i64, data: Bytes) -> Result<(), BlobError>;

    /// Reads the blob stored under the key.
    async fn load(&self, kind: BlobKind, id: i64) -> Result<Bytes, BlobError>;

    /// Appends `chunk`, creating the blob if needed.
    async fn append(&self, kind: BlobKind, id: i64, chunk: &[u8]) -> Result<(), BlobError>;
}

/// Filesystem store laid out as `<root>/<kind>/<kind>-<id>`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Creates a store rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Location of a blob on disk.
    #[must_use]
    pub fn path(&self, kind: BlobKind, id: i64) -> PathBuf {
        self.root
            .join(kind.as_str())
            .join(format!("{}-{id}", kind.as_str()))
    }

    async fn prepare(&self, kind: BlobKind, id: i64) -> Result<PathBuf, BlobError> {
        let path = self.path(kind, id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error(parent, source))?;
        }
        Ok(path)
    }
}

fn io_error(path: &Path, source: io::Error) -> BlobError {
    BlobError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn store(&self, kind: BlobKind, id: i64, data: Bytes) -> Result<(), BlobError> {
        let path = self.prepare(kind, id).await?;
        tokio::fs::write(&path, &data)
            .await
            .map_err(|source| io_error(&path, source))
    }

    async fn load(&self, kind: BlobKind, id: i64) -> Result<Bytes, BlobError> {
        let path = self.path(kind, id);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(BlobError::NotFound { kind, id })
            }
            Err(source) => Err(io_error(&path, source)),
        }
    }

    async fn append(&self, kind: BlobKind, id: i64, chunk: &[u8]) -> Result<(), BlobError> {
        let path = self.prepare(kind, id).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| io_error(&path, source))?;
        file.write_all(chunk)
            .await
            .map_err(|source| io_error(&path, source))?;
        file.flush().await.map_err(|source| io_error(&path, source))
    }
}

/// In-process store, used by tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<(BlobKind, i64), Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store(&self, kind: BlobKind, id: i64, data: Bytes) -> Result<(), BlobError> {
        self.blobs.write().insert((kind, id), data.to_vec());
        Ok(())
    }

    async fn load(&self, kind: BlobKind, id: i64) -> Result<Bytes, BlobError> {
        self.blobs
            .read()
            .get(&(kind, id))
            .map(|data| Bytes::copy_from_slice(data))
            .ok_or(BlobError::NotFound { kind, id })
    }

    async fn append(&self, kind: BlobKind, id: i64, chunk: &[u8]) -> Result<(), BlobError> {
        self.blobs
            .write()
            .entry((kind, id))
            .or_default()
            .extend_from_slice(chunk);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn fs_store_round_trips_and_lays_out_paths() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FsBlobStore::new(dir.path());

        store
            .store(BlobKind::PlanArtifact, 7, Bytes::from_static(b"binary"))
            .await?;

        assert!(dir.path().join("plan").join("plan-7").is_file());
        assert_eq!(store.load(BlobKind::PlanArtifact, 7).await?, "binary");
        Ok(())
    }

    #[tokio::test]
    async fn fs_append_accumulates_lines() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FsBlobStore::new(dir.path());

        store.append(BlobKind::PlanLog, 1, b"Initializing...\n").await?;
        store.append(BlobKind::PlanLog, 1, b"Plan: 3 to add\n").await?;

        let log = store.load(BlobKind::PlanLog, 1).await?;
        assert_eq!(log, "Initializing...\nPlan: 3 to add\n");
        Ok(())
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        let result = store.load(BlobKind::ApplyLog, 99).await;
        assert!(matches!(
            result,
            Err(BlobError::NotFound {
                kind: BlobKind::ApplyLog,
                id: 99
            })
        ));
    }

    #[tokio::test]
    async fn memory_store_keys_by_kind_and_id() -> anyhow::Result<()> {
        let store = MemoryBlobStore::new();
        store.append(BlobKind::PlanLog, 1, b"a").await?;
        store.append(BlobKind::PlanLog, 1, b"b").await?;
        store.append(BlobKind::ApplyLog, 1, b"c").await?;

        assert_eq!(store.load(BlobKind::PlanLog, 1).await?, "ab");
        assert_eq!(store.load(BlobKind::ApplyLog, 1).await?, "c");
        assert!(store.load(BlobKind::PlanArtifact, 1).await.is_err());
        Ok(())
    }
}
