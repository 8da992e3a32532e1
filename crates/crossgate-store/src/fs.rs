//! Filesystem implementation of [`ContentStore`].
//!
//! Each blob lives in its own file named by the lowercase hex of its
//! SHA-256. Writes go to a temporary file first and are renamed into place,
//! so a crash never leaves a partial blob under a valid name.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crossgate_core::Sha256Hash;

use crate::error::{Result, StoreError};
use crate::traits::ContentStore;

/// A directory of content-addressed blobs.
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    /// Open (and create if needed) a content directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Path of the file holding `id`.
    pub fn blob_path(&self, id: &Sha256Hash) -> PathBuf {
        self.root.join(id.to_hex())
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn put(&self, bytes: &[u8]) -> Result<Sha256Hash> {
        let id = Sha256Hash::hash(bytes);
        let path = self.blob_path(&id);

        if tokio::fs::try_exists(&path).await? {
            return Ok(id);
        }

        let tmp = self.root.join(format!(".{}.tmp", id.to_hex()));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(id = %id, len = bytes.len(), "stored content blob");
        Ok(id)
    }

    async fn get(&self, id: &Sha256Hash) -> Result<Option<Vec<u8>>> {
        let bytes = match tokio::fs::read(self.blob_path(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let actual = Sha256Hash::hash(&bytes);
        if actual != *id {
            return Err(StoreError::Corrupted {
                id: id.to_hex(),
                actual: actual.to_hex(),
            });
        }
        Ok(Some(bytes))
    }

    async fn contains(&self, id: &Sha256Hash) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.blob_path(id)).await?)
    }
}
