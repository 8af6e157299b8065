//! In-memory storage backend.
//!
//! Useful for tests and ephemeral drives. All handles opened from the same
//! `MemoryStorage` share one namespace, so a reader factory and a writer
//! factory over the same instance observe each other's writes.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use peerdrive_core::storage::{RandomAccess, StorageFactory, StorageResult};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct MemoryStorage {
    regions: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps the storage in an `Arc` for sharing between drives.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl StorageFactory for MemoryStorage {
    fn open(&self, name: &str) -> StorageResult<Arc<dyn RandomAccess>> {
        self.regions.entry(name.to_string()).or_default();
        Ok(Arc::new(MemoryRegion {
            regions: self.regions.clone(),
            name: name.to_string(),
        }))
    }
}

#[derive(Debug)]
pub struct MemoryRegion {
    regions: Arc<DashMap<String, Vec<u8>>>,
    name: String,
}

#[async_trait]
impl RandomAccess for MemoryRegion {
    async fn read(&self, offset: u64, length: u64) -> StorageResult<Bytes> {
        let data = match self.regions.get(&self.name) {
            Some(data) => data,
            None => return Ok(Bytes::new()),
        };
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(length as usize).min(data.len());
        Ok(Bytes::copy_from_slice(&data[start..end]))
    }

    async fn write(&self, offset: u64, chunk: &[u8]) -> StorageResult<()> {
        let mut data = self.regions.entry(self.name.clone()).or_default();
        let end = offset as usize + chunk.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(chunk);
        Ok(())
    }

    async fn len(&self) -> StorageResult<u64> {
        Ok(self
            .regions
            .get(&self.name)
            .map(|data| data.len() as u64)
            .unwrap_or(0))
    }

    async fn sync(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerdrive_core::testutil::StorageTests;

    #[tokio::test]
    async fn conformance() {
        let storage = MemoryStorage::new();
        StorageTests::new(&storage).run_all().await;
    }

    #[tokio::test]
    async fn same_name_shares_a_region() {
        let storage = MemoryStorage::new();
        let a = storage.open("x").unwrap();
        let b = storage.open("x").unwrap();

        a.write(0, b"shared").await.unwrap();
        assert_eq!(&b.read(0, 6).await.unwrap()[..], b"shared");
    }
}
