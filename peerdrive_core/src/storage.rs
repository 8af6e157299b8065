//! Random-access byte storage used by the log layer.
//!
//! A `StorageFactory` opens named file-like handles; a log binds one handle
//! per concern (block data, offsets, keys, signatures). Implementations may
//! use local files, memory buffers, databases, etc.

use async_trait::async_trait;
use bytes::Bytes;
use std::{fmt::Debug, sync::Arc};

pub type StorageResult<T> = anyhow::Result<T>;

/// A single named, random-access byte region.
///
/// Reads past the end of the region return short (possibly empty) results
/// rather than erroring; writes past the end grow the region, zero-filling
/// any gap.
#[async_trait]
pub trait RandomAccess: Debug + Send + Sync + 'static {
    async fn read(&self, offset: u64, length: u64) -> StorageResult<Bytes>;

    async fn write(&self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Current length of the region in bytes.
    async fn len(&self) -> StorageResult<u64>;

    /// Flushes buffered writes to the backing medium.
    async fn sync(&self) -> StorageResult<()>;
}

/// Opens named `RandomAccess` handles under a common root.
///
/// Opening the same name twice returns handles over the same region.
pub trait StorageFactory: Debug + Send + Sync + 'static {
    fn open(&self, name: &str) -> StorageResult<Arc<dyn RandomAccess>>;
}

impl<T: StorageFactory + ?Sized> StorageFactory for Arc<T> {
    fn open(&self, name: &str) -> StorageResult<Arc<dyn RandomAccess>> {
        (**self).open(name)
    }
}

/// A factory that prefixes every opened name, so several logs can share one
/// backend without colliding.
#[derive(Debug, Clone)]
pub struct Namespaced {
    inner: Arc<dyn StorageFactory>,
    prefix: String,
}

impl Namespaced {
    pub fn new(inner: Arc<dyn StorageFactory>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }
}

impl StorageFactory for Namespaced {
    fn open(&self, name: &str) -> StorageResult<Arc<dyn RandomAccess>> {
        self.inner.open(&format!("{}/{}", self.prefix, name))
    }
}
