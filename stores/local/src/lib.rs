//! Local filesystem storage backend.
//!
//! Each named handle maps to one file under the base directory. Handles
//! open the file per operation, so several handles over the same name stay
//! coherent without shared in-process state.

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use peerdrive_core::storage::{RandomAccess, StorageFactory, StorageResult};
use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalStorageConfig {
    pub base_path: String,
}

#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn create(config: LocalStorageConfig) -> Self {
        Self {
            base_path: config.base_path.into(),
        }
    }

    fn resolve(&self, name: &str) -> StorageResult<PathBuf> {
        // Handle names stay inside the base directory.
        let escapes = name.starts_with('/') || name.split('/').any(|segment| segment == "..");
        if escapes {
            return Err(anyhow!("handle name '{name}' would escape the storage root"));
        }
        Ok(self.base_path.join(name))
    }
}

impl StorageFactory for LocalStorage {
    fn open(&self, name: &str) -> StorageResult<Arc<dyn RandomAccess>> {
        Ok(Arc::new(LocalRegion {
            path: self.resolve(name)?,
        }))
    }
}

#[derive(Debug)]
pub struct LocalRegion {
    path: PathBuf,
}

impl LocalRegion {
    async fn open_write(&self) -> StorageResult<File> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .open(&self.path)
            .await?)
    }
}

#[async_trait]
impl RandomAccess for LocalRegion {
    async fn read(&self, offset: u64, length: u64) -> StorageResult<Bytes> {
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Bytes::new()),
            Err(err) => return Err(err.into()),
        };
        let total = file.metadata().await?.len();
        if offset >= total {
            return Ok(Bytes::new());
        }
        let available = (total - offset).min(length);

        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; available as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf.into())
    }

    async fn write(&self, offset: u64, chunk: &[u8]) -> StorageResult<()> {
        let mut file = self.open_write().await?;
        // Seeking past the end leaves a zero-filled gap.
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(chunk).await?;
        file.flush().await?;
        Ok(())
    }

    async fn len(&self) -> StorageResult<u64> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    async fn sync(&self) -> StorageResult<()> {
        match File::open(&self.path).await {
            Ok(file) => {
                file.sync_all().await?;
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Convenience for the common on-disk drive layout: two factories rooted
/// at `<folder>/metadata` and `<folder>/content`.
pub fn folder_factories(folder: impl AsRef<Path>) -> (LocalStorage, LocalStorage) {
    let folder = folder.as_ref();
    (
        LocalStorage::new(folder.join("metadata")),
        LocalStorage::new(folder.join("content")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerdrive_core::testutil::StorageTests;

    #[tokio::test]
    async fn conformance() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        StorageTests::new(&storage).run_all().await;
    }

    #[tokio::test]
    async fn rejects_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(storage.open("../escape").is_err());
        assert!(storage.open("/absolute").is_err());
    }

    #[tokio::test]
    async fn folder_layout() {
        let dir = tempfile::tempdir().unwrap();
        let (metadata, content) = folder_factories(dir.path());
        metadata.open("key").unwrap().write(0, b"m").await.unwrap();
        content.open("key").unwrap().write(0, b"c").await.unwrap();

        assert!(dir.path().join("metadata/key").is_file());
        assert!(dir.path().join("content/key").is_file());
    }
}
