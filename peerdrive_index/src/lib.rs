//! A persistent key index stored inside a feed's blocks.
//!
//! Block 0 of the backing feed is a reserved [`IndexHeader`]; every later
//! block encodes one mutation (`put` or `del`) of a flat key space. The
//! in-memory view is rebuilt by replaying blocks in order and kept current
//! by applying whatever the feed has that the view has not, so blocks that
//! arrive through replication surface exactly like local writes.
//!
//! The index is versioned by construction: version `v` is the state after
//! applying the first `v` blocks. [`Index::checkout`] rebinds the same
//! feed to a frozen historical version.

use bytes::Bytes;
use futures::stream::BoxStream;
use minicbor::{CborLen, Decode, Encode, bytes::ByteVec};
use peerdrive_core::IndexHeader;
use peerdrive_log::{Feed, FeedError, FeedEvent};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::warn;

#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    #[error("index is read-only")]
    ReadOnly,

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("version {version} out of range (length {length})")]
    BadVersion { version: u64, length: u64 },

    #[error("index block is corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// Options for [`Index::create`].
#[derive(Default)]
pub struct IndexOptions {
    /// Opaque payload embedded in the header block when this call creates
    /// a fresh index over an empty writable feed.
    pub metadata: Option<Bytes>,
}

#[repr(u8)]
#[derive(Encode, Decode, CborLen, Clone, Copy, Debug, PartialEq, Eq)]
#[cbor(index_only)]
enum NodeOp {
    #[n(0)]
    Put = 0,
    #[n(1)]
    Del = 1,
}

/// One mutation block.
#[derive(Encode, Decode, CborLen, Clone, Debug)]
#[cbor(array)]
struct IndexNode {
    #[n(0)]
    op: NodeOp,
    #[n(1)]
    key: String,
    #[n(2)]
    value: Option<ByteVec>,
}

struct IndexState {
    applied: u64,
    header: Option<IndexHeader>,
    entries: BTreeMap<String, Bytes>,
}

struct IndexInner {
    feed: Arc<Feed>,
    /// Set on checkout snapshots: never apply blocks at or past this.
    limit: Option<u64>,
    state: RwLock<IndexState>,
    write_lock: Mutex<()>,
    changes: broadcast::Sender<String>,
}

/// A live view over the index blocks of a feed.
#[derive(Clone)]
pub struct Index {
    inner: Arc<IndexInner>,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("feed", &self.inner.feed)
            .field("limit", &self.inner.limit)
            .finish_non_exhaustive()
    }
}

impl Index {
    /// Opens the index over a feed, writing the header block first when
    /// the feed is a fresh writable one.
    ///
    /// On an existing feed the header is decoded instead; a feed whose
    /// block 0 is not an index header fails with `Corrupt`.
    pub async fn create(feed: Arc<Feed>, options: IndexOptions) -> Result<Index, IndexError> {
        if feed.length().await == 0 && feed.writable() {
            let header = IndexHeader::new(options.metadata);
            let block = header
                .encode()
                .map_err(|e| IndexError::Corrupt(e.to_string()))?;
            feed.append(block).await?;
        }

        let (changes, _) = broadcast::channel(256);
        let index = Index {
            inner: Arc::new(IndexInner {
                feed,
                limit: None,
                state: RwLock::new(IndexState {
                    applied: 0,
                    header: None,
                    entries: BTreeMap::new(),
                }),
                write_lock: Mutex::new(()),
                changes,
            }),
        };
        index.refresh().await?;
        index.spawn_refresh_task();
        Ok(index)
    }

    /// The version this view reflects: the number of feed blocks applied,
    /// header block included. A fresh index is at version 1.
    pub async fn version(&self) -> u64 {
        self.inner.state.read().await.applied
    }

    /// True when this view cannot be mutated: a checkout snapshot, or an
    /// index over a feed we cannot sign for.
    pub fn read_only(&self) -> bool {
        self.inner.limit.is_some() || !self.inner.feed.writable()
    }

    /// The header payload, once a header block is available.
    pub async fn metadata(&self) -> Result<Option<Bytes>, IndexError> {
        self.refresh().await?;
        let state = self.inner.state.read().await;
        Ok(state.header.as_ref().and_then(|h| h.metadata()))
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, IndexError> {
        self.refresh().await?;
        let state = self.inner.state.read().await;
        Ok(state.entries.get(key).cloned())
    }

    pub async fn put(&self, key: &str, value: Bytes) -> Result<(), IndexError> {
        self.ensure_writable()?;
        let _guard = self.inner.write_lock.lock().await;
        self.append_node(IndexNode {
            op: NodeOp::Put,
            key: key.to_string(),
            value: Some(value.to_vec().into()),
        })
        .await
    }

    /// Removes a key. Fails with `KeyNotFound` when it is absent.
    pub async fn del(&self, key: &str) -> Result<(), IndexError> {
        self.ensure_writable()?;
        let _guard = self.inner.write_lock.lock().await;
        self.refresh().await?;
        {
            let state = self.inner.state.read().await;
            if !state.entries.contains_key(key) {
                return Err(IndexError::KeyNotFound(key.to_string()));
            }
        }
        self.append_node(IndexNode {
            op: NodeOp::Del,
            key: key.to_string(),
            value: None,
        })
        .await
    }

    /// All entries at or under a prefix, in key order. The prefix itself
    /// is included when present; `""` matches everything.
    pub async fn entries_under(&self, prefix: &str) -> Result<Vec<(String, Bytes)>, IndexError> {
        self.refresh().await?;
        let state = self.inner.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|(key, _)| key_under(prefix, key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    /// The first entry strictly under a prefix, if any. A cheap emptiness
    /// probe for directory semantics.
    pub async fn first_child(&self, prefix: &str) -> Result<Option<String>, IndexError> {
        self.refresh().await?;
        let state = self.inner.state.read().await;
        Ok(state
            .entries
            .keys()
            .find(|key| key.as_str() != prefix && key_under(prefix, key))
            .cloned())
    }

    /// Streaming variant of [`Index::entries_under`].
    pub async fn stream(
        &self,
        prefix: &str,
    ) -> Result<BoxStream<'static, (String, Bytes)>, IndexError> {
        let entries = self.entries_under(prefix).await?;
        Ok(Box::pin(futures::stream::iter(entries)))
    }

    /// Subscribes to changes at or under a prefix.
    pub fn watch(&self, prefix: impl Into<String>) -> IndexWatcher {
        IndexWatcher {
            receiver: self.inner.changes.subscribe(),
            prefix: prefix.into(),
        }
    }

    /// An immutable view of the index after its first `version` blocks.
    ///
    /// Shares the backing feed; later feed appends are never applied to
    /// the snapshot, and mutation fails with `ReadOnly`.
    pub async fn checkout(&self, version: u64) -> Result<Index, IndexError> {
        let length = self.inner.feed.length().await;
        if version < 1 || version > length {
            return Err(IndexError::BadVersion { version, length });
        }

        let (changes, _) = broadcast::channel(1);
        let snapshot = Index {
            inner: Arc::new(IndexInner {
                feed: self.inner.feed.clone(),
                limit: Some(version),
                state: RwLock::new(IndexState {
                    applied: 0,
                    header: None,
                    entries: BTreeMap::new(),
                }),
                write_lock: Mutex::new(()),
                changes,
            }),
        };
        snapshot.refresh().await?;
        Ok(snapshot)
    }

    fn ensure_writable(&self) -> Result<(), IndexError> {
        if self.read_only() {
            return Err(IndexError::ReadOnly);
        }
        Ok(())
    }

    async fn append_node(&self, node: IndexNode) -> Result<(), IndexError> {
        let mut block = Vec::new();
        minicbor::encode(&node, &mut block).map_err(|e| IndexError::Corrupt(e.to_string()))?;
        self.inner.feed.append(block).await?;
        self.refresh().await
    }

    /// Applies feed blocks the in-memory view has not seen yet and
    /// notifies watchers of every key they touched.
    async fn refresh(&self) -> Result<(), IndexError> {
        let target = {
            let length = self.inner.feed.length().await;
            match self.inner.limit {
                Some(limit) => length.min(limit),
                None => length,
            }
        };
        if self.inner.state.read().await.applied >= target {
            return Ok(());
        }

        let mut state = self.inner.state.write().await;
        let mut touched = Vec::new();
        while state.applied < target {
            let block = self.inner.feed.get(state.applied).await?;
            if state.applied == 0 {
                let header = IndexHeader::decode(&block)
                    .map_err(|e| IndexError::Corrupt(e.to_string()))?;
                state.header = Some(header);
            } else {
                let node: IndexNode = minicbor::decode(&block)
                    .map_err(|e| IndexError::Corrupt(e.to_string()))?;
                match node.op {
                    NodeOp::Put => {
                        let value = node.value.map(|v| Bytes::from(v.to_vec())).unwrap_or_default();
                        state.entries.insert(node.key.clone(), value);
                    }
                    NodeOp::Del => {
                        state.entries.remove(&node.key);
                    }
                }
                touched.push(node.key);
            }
            state.applied += 1;
        }
        drop(state);

        for key in touched {
            let _ = self.inner.changes.send(key);
        }
        Ok(())
    }

    /// Keeps the view current with replicated appends, so watchers fire
    /// for remote writes too.
    fn spawn_refresh_task(&self) {
        let weak = Arc::downgrade(&self.inner);
        let mut events = self.inner.feed.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(FeedEvent::Append { .. }) => {
                        let Some(inner) = weak.upgrade() else { break };
                        let index = Index { inner };
                        if let Err(err) = index.refresh().await {
                            warn!(error = %err, "index refresh failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

/// Change notifications for one prefix.
pub struct IndexWatcher {
    receiver: broadcast::Receiver<String>,
    prefix: String,
}

impl IndexWatcher {
    /// Waits for the next change at or under the watched prefix. Returns
    /// `None` once the index is gone.
    pub async fn changed(&mut self) -> Option<String> {
        loop {
            match self.receiver.recv().await {
                Ok(key) if key_under(&self.prefix, &key) => return Some(key),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// True when `key` equals `prefix` or sits underneath it. The empty
/// prefix is the root and matches every key.
fn key_under(prefix: &str, key: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match key.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerdrive_log::FeedOptions;
    use peerdrive_store_memory::MemoryStorage;

    async fn fresh_feed(storage: &MemoryStorage) -> Arc<Feed> {
        Feed::open(
            storage,
            FeedOptions {
                create_if_missing: true,
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    async fn fresh_index(storage: &MemoryStorage) -> Index {
        let feed = fresh_feed(storage).await;
        Index::create(
            feed,
            IndexOptions {
                metadata: Some(Bytes::from_static(b"content key goes here")),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn header_is_written_and_restored() {
        let storage = MemoryStorage::new();
        let index = fresh_index(&storage).await;
        assert_eq!(index.version().await, 1);
        assert_eq!(
            index.metadata().await.unwrap(),
            Some(Bytes::from_static(b"content key goes here"))
        );
        drop(index);

        // A second open over the same storage must not write again.
        let feed = fresh_feed(&storage).await;
        assert_eq!(feed.length().await, 1);
        let reopened = Index::create(feed, IndexOptions::default()).await.unwrap();
        assert_eq!(
            reopened.metadata().await.unwrap(),
            Some(Bytes::from_static(b"content key goes here"))
        );
    }

    #[tokio::test]
    async fn put_get_del() {
        let storage = MemoryStorage::new();
        let index = fresh_index(&storage).await;

        index.put("a/b", Bytes::from_static(b"1")).await.unwrap();
        assert_eq!(index.get("a/b").await.unwrap(), Some(Bytes::from_static(b"1")));
        assert_eq!(index.version().await, 2);

        index.del("a/b").await.unwrap();
        assert_eq!(index.get("a/b").await.unwrap(), None);

        assert!(matches!(
            index.del("a/b").await,
            Err(IndexError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn prefix_listing() {
        let storage = MemoryStorage::new();
        let index = fresh_index(&storage).await;
        for key in ["docs", "docs/a", "docs/b/c", "docsier", "other"] {
            index.put(key, Bytes::from_static(b"x")).await.unwrap();
        }

        let under: Vec<String> = index
            .entries_under("docs")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(under, vec!["docs", "docs/a", "docs/b/c"]);

        assert_eq!(
            index.first_child("docs").await.unwrap(),
            Some("docs/a".to_string())
        );
        assert_eq!(index.first_child("other").await.unwrap(), None);

        let all = index.entries_under("").await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn stream_yields_listed_entries() {
        use futures::StreamExt;

        let storage = MemoryStorage::new();
        let index = fresh_index(&storage).await;
        index.put("s/a", Bytes::from_static(b"1")).await.unwrap();
        index.put("s/b", Bytes::from_static(b"2")).await.unwrap();

        let streamed: Vec<String> = index
            .stream("s")
            .await
            .unwrap()
            .map(|(key, _)| key)
            .collect()
            .await;
        assert_eq!(streamed, vec!["s/a", "s/b"]);
    }

    #[tokio::test]
    async fn checkout_is_immutable() {
        let storage = MemoryStorage::new();
        let index = fresh_index(&storage).await;
        index.put("file", Bytes::from_static(b"old")).await.unwrap();
        let version = index.version().await;

        index.put("file", Bytes::from_static(b"new")).await.unwrap();
        index.put("later", Bytes::from_static(b"x")).await.unwrap();

        let snapshot = index.checkout(version).await.unwrap();
        assert_eq!(
            snapshot.get("file").await.unwrap(),
            Some(Bytes::from_static(b"old"))
        );
        assert_eq!(snapshot.get("later").await.unwrap(), None);
        assert!(snapshot.read_only());
        assert!(matches!(
            snapshot.put("file", Bytes::new()).await,
            Err(IndexError::ReadOnly)
        ));

        // Writes that land after the checkout stay invisible to it.
        index.put("even/later", Bytes::from_static(b"y")).await.unwrap();
        assert_eq!(snapshot.get("even/later").await.unwrap(), None);
        assert_eq!(snapshot.version().await, version);
    }

    #[tokio::test]
    async fn checkout_rejects_bad_versions() {
        let storage = MemoryStorage::new();
        let index = fresh_index(&storage).await;
        assert!(matches!(
            index.checkout(0).await,
            Err(IndexError::BadVersion { .. })
        ));
        assert!(matches!(
            index.checkout(99).await,
            Err(IndexError::BadVersion { .. })
        ));
    }

    #[tokio::test]
    async fn watchers_fire_for_matching_prefix() {
        let storage = MemoryStorage::new();
        let index = fresh_index(&storage).await;
        let mut watcher = index.watch("docs");

        index.put("other", Bytes::from_static(b"x")).await.unwrap();
        index.put("docs/a", Bytes::from_static(b"y")).await.unwrap();

        let changed = watcher.changed().await.unwrap();
        assert_eq!(changed, "docs/a");
    }

    #[tokio::test]
    async fn second_view_follows_the_same_feed() {
        let storage = MemoryStorage::new();
        let feed = fresh_feed(&storage).await;
        let writer = Index::create(feed.clone(), IndexOptions::default())
            .await
            .unwrap();
        let reader = Index::create(feed, IndexOptions::default()).await.unwrap();

        writer.put("shared", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(
            reader.get("shared").await.unwrap(),
            Some(Bytes::from_static(b"v"))
        );
    }

    #[tokio::test]
    async fn foreign_first_block_is_rejected() {
        let storage = MemoryStorage::new();
        let feed = fresh_feed(&storage).await;
        feed.append(Bytes::from_static(b"not a header")).await.unwrap();

        let result = Index::create(feed, IndexOptions::default()).await;
        assert!(matches!(result, Err(IndexError::Corrupt(_))));
    }
}
