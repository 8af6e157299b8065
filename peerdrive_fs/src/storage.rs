//! Binds a caller-supplied storage descriptor to the two logs' backends.
//!
//! A drive needs two storage factories, one per log. Callers can hand
//! over a filesystem folder (the common case), one factory that gets
//! namespaced, or two explicit factories.

use peerdrive_core::storage::{Namespaced, StorageFactory};
use peerdrive_store_local::folder_factories;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

/// Where a drive keeps its two logs.
#[derive(Debug, Clone)]
pub enum DriveStorage {
    /// A folder; logs live under `<folder>/metadata` and `<folder>/content`.
    Folder(PathBuf),
    /// One factory, namespaced as `metadata/<name>` and `content/<name>`.
    Factory(Arc<dyn StorageFactory>),
    /// Explicit factories per log.
    Split {
        metadata: Arc<dyn StorageFactory>,
        content: Arc<dyn StorageFactory>,
    },
}

impl DriveStorage {
    pub fn factory(factory: impl StorageFactory) -> Self {
        Self::Factory(Arc::new(factory))
    }

    pub fn split(metadata: impl StorageFactory, content: impl StorageFactory) -> Self {
        Self::Split {
            metadata: Arc::new(metadata),
            content: Arc::new(content),
        }
    }

    /// The metadata and content factories, in that order.
    pub(crate) fn bind(&self) -> (Arc<dyn StorageFactory>, Arc<dyn StorageFactory>) {
        match self {
            DriveStorage::Folder(folder) => {
                let (metadata, content) = folder_factories(folder);
                (Arc::new(metadata), Arc::new(content))
            }
            DriveStorage::Factory(factory) => (
                Arc::new(Namespaced::new(factory.clone(), "metadata")),
                Arc::new(Namespaced::new(factory.clone(), "content")),
            ),
            DriveStorage::Split { metadata, content } => (metadata.clone(), content.clone()),
        }
    }
}

impl From<&Path> for DriveStorage {
    fn from(path: &Path) -> Self {
        Self::Folder(path.to_path_buf())
    }
}

impl From<PathBuf> for DriveStorage {
    fn from(path: PathBuf) -> Self {
        Self::Folder(path)
    }
}

impl From<&str> for DriveStorage {
    fn from(path: &str) -> Self {
        Self::Folder(path.into())
    }
}

impl From<Arc<dyn StorageFactory>> for DriveStorage {
    fn from(factory: Arc<dyn StorageFactory>) -> Self {
        Self::Factory(factory)
    }
}
