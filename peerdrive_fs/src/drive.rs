//! The drive: bootstrap and the filesystem surface.

use crate::{
    io::{ReadOptions, WriteStream},
    path::normalize,
    storage::DriveStorage,
};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::StreamExt;
use peerdrive_core::{
    PUBLIC_KEY_SIZE, Stat, StatError, StatOptions, derive_content_keypair,
    storage::StorageFactory,
};
use peerdrive_index::{Index, IndexError, IndexOptions, IndexWatcher};
use peerdrive_log::{
    ByteStream, Feed, FeedError, FeedEvent, FeedOptions, ReadStreamOptions, ReplicateOptions,
    ReplicationError, Replicator,
};
use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{Mutex, broadcast, watch},
};
use tracing::{debug, warn};

/// Buffer writes larger than this are split into multiple content blocks.
pub(crate) const WRITE_CHUNK: usize = 64 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum DriveError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("checkout requires both logs and a snapshot view")]
    InvalidCheckout,

    #[error("drive bootstrap failed: {0}")]
    Bootstrap(anyhow::Error),

    #[error("drive is not writable")]
    NotWritable,

    #[error("drive is closed")]
    Closed,

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error(transparent)]
    Stat(#[from] StatError),

    #[error("stream failed: {0}")]
    Stream(#[from] std::io::Error),

    #[error("file is not valid utf-8")]
    NotUtf8(#[from] std::string::FromUtf8Error),
}

fn bootstrap_err(err: impl Into<anyhow::Error>) -> DriveError {
    DriveError::Bootstrap(err.into())
}

/// Observable drive signals.
#[derive(Clone, Debug)]
pub enum DriveEvent {
    /// The content log became available. Fires only when it was still
    /// pending after open, which happens on key-only drives whose
    /// metadata header has not replicated yet.
    Content,
    /// The metadata log grew, locally or through replication.
    Update { length: u64 },
    /// A write stream opened for this path.
    Appending { path: String, options: StatOptions },
    /// A write stream committed its stat for this path.
    Append { path: String, options: StatOptions },
    /// A background task failed.
    Error { message: String },
}

/// Options for [`Drive::open`].
#[derive(Default)]
pub struct DriveOptions {
    /// Expected metadata-log public key. Omit to create a new drive or to
    /// restore whatever the storage holds.
    pub key: Option<[u8; PUBLIC_KEY_SIZE]>,
    /// Metadata-log secret key, for restoring a writable drive onto blank
    /// storage.
    pub secret_key: Option<[u8; 64]>,
}

#[derive(Clone)]
pub(crate) enum ContentState {
    Pending,
    Ready(Arc<Feed>),
    Failed(String),
}

/// Cached content-log counters, owned by the append lock so a writer sees
/// a consistent snapshot for the whole write.
#[derive(Default)]
pub(crate) struct ContentCursor {
    pub(crate) length: u64,
    pub(crate) byte_length: u64,
}

pub(crate) struct DriveInner {
    pub(crate) metadata: Arc<Feed>,
    pub(crate) index: Index,
    content_rx: watch::Receiver<ContentState>,
    content_tx: watch::Sender<ContentState>,
    pub(crate) append_lock: Arc<Mutex<ContentCursor>>,
    pub(crate) events: broadcast::Sender<DriveEvent>,
    close_tx: watch::Sender<bool>,
    closed: AtomicBool,
    is_checkout: bool,
}

impl DriveInner {
    /// Resolves the content log, waiting while it is still pending.
    pub(crate) async fn content(&self) -> Result<Arc<Feed>, DriveError> {
        let mut rx = self.content_rx.clone();
        loop {
            {
                let state = rx.borrow_and_update();
                match &*state {
                    ContentState::Ready(feed) => return Ok(feed.clone()),
                    ContentState::Failed(message) => {
                        return Err(bootstrap_err(anyhow::anyhow!(message.clone())));
                    }
                    ContentState::Pending => {}
                }
            }
            if rx.changed().await.is_err() {
                return Err(DriveError::Closed);
            }
        }
    }

    fn content_now(&self) -> Option<Arc<Feed>> {
        match &*self.content_rx.borrow() {
            ContentState::Ready(feed) => Some(feed.clone()),
            _ => None,
        }
    }
}

/// A versioned peer-to-peer drive.
///
/// Cheap to clone; all clones share the same logs, index, and append
/// lock. See the crate docs for an overview.
#[derive(Clone)]
pub struct Drive {
    inner: Arc<DriveInner>,
}

impl std::fmt::Debug for Drive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drive")
            .field("metadata", &self.inner.metadata)
            .field("checkout", &self.inner.is_checkout)
            .finish_non_exhaustive()
    }
}

impl Drive {
    /// Opens or creates a drive over the given storage.
    ///
    /// With no options this creates a fresh drive (new keypair) or
    /// restores an existing one from storage. Supplying only `key` opens
    /// a read-only replica; its content log may become available later
    /// than open returns, once the metadata header has replicated (the
    /// [`DriveEvent::Content`] event).
    pub async fn open(
        storage: impl Into<DriveStorage>,
        options: DriveOptions,
    ) -> Result<Drive, DriveError> {
        let storage = storage.into();
        let (metadata_factory, content_factory) = storage.bind();

        let metadata = Feed::open(
            &metadata_factory,
            FeedOptions {
                key: options.key,
                secret_key: options.secret_key,
                create_if_missing: true,
            },
        )
        .await
        .map_err(bootstrap_err)?;

        let (events, _) = broadcast::channel(256);
        let (content_tx, content_rx) = watch::channel(ContentState::Pending);
        let (close_tx, _) = watch::channel(false);

        let fresh = metadata.writable() && metadata.length().await == 0;
        let (index, content) = if fresh {
            let keypair = derive_metadata_content_keypair(&metadata)?;
            let content = Feed::open(
                &content_factory,
                FeedOptions {
                    key: Some(keypair.public),
                    secret_key: Some(keypair.secret),
                    create_if_missing: true,
                },
            )
            .await
            .map_err(bootstrap_err)?;
            // Writing the index header embeds the content key before any
            // filesystem content exists.
            let index = Index::create(
                metadata.clone(),
                IndexOptions {
                    metadata: Some(Bytes::copy_from_slice(&keypair.public)),
                },
            )
            .await
            .map_err(bootstrap_err)?;
            (index, Some(content))
        } else {
            let index = Index::create(metadata.clone(), IndexOptions::default())
                .await
                .map_err(bootstrap_err)?;
            let content = if metadata.writable() {
                // The content secret is recoverable, no header read needed.
                let keypair = derive_metadata_content_keypair(&metadata)?;
                let content = Feed::open(
                    &content_factory,
                    FeedOptions {
                        key: Some(keypair.public),
                        secret_key: Some(keypair.secret),
                        create_if_missing: true,
                    },
                )
                .await
                .map_err(bootstrap_err)?;
                Some(content)
            } else {
                match index.metadata().await.map_err(bootstrap_err)? {
                    Some(key_bytes) => {
                        let key = content_key_from_header(&key_bytes)?;
                        let content =
                            open_content_readonly(&content_factory, key).await?;
                        Some(content)
                    }
                    None => {
                        if metadata.length().await > 0 {
                            return Err(bootstrap_err(anyhow::anyhow!(
                                "metadata header carries no content key"
                            )));
                        }
                        // No header block yet: the metadata log is empty
                        // and not ours, so the header must arrive via
                        // replication.
                        None
                    }
                }
            };
            (index, content)
        };

        let cursor = match &content {
            Some(content) => {
                let (length, byte_length) = content.lengths().await;
                ContentCursor {
                    length,
                    byte_length,
                }
            }
            None => ContentCursor::default(),
        };

        let inner = Arc::new(DriveInner {
            metadata,
            index,
            content_rx,
            content_tx,
            append_lock: Arc::new(Mutex::new(cursor)),
            events,
            close_tx,
            closed: AtomicBool::new(false),
            is_checkout: false,
        });

        spawn_update_forwarder(&inner);
        match content {
            Some(content) => {
                let _ = inner.content_tx.send(ContentState::Ready(content));
            }
            None => spawn_content_waiter(&inner, content_factory),
        }

        debug!(drive = ?short_hex(&inner.metadata.key()), "drive open");
        Ok(Drive { inner })
    }

    /// The drive's key: the metadata log's public key.
    pub fn key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.inner.metadata.key()
    }

    /// A public, non-reversible tag for peer rendezvous.
    pub fn discovery_key(&self) -> [u8; 32] {
        self.inner.metadata.discovery_key()
    }

    /// The metadata log's 64-byte secret key, when this drive holds it.
    /// Enough to rebuild a writable drive on storage that has never seen
    /// this feed.
    pub fn secret_key(&self) -> Option<[u8; 64]> {
        self.inner.metadata.secret_key()
    }

    /// True when this drive can write: it holds the metadata secret key
    /// and is not a checkout snapshot.
    pub fn writable(&self) -> bool {
        !self.inner.index.read_only()
    }

    /// The drive's current version: the metadata-log length this drive's
    /// index view reflects. Inherits the index's versioning, where a
    /// fresh drive (header only) is at version 1.
    pub async fn version(&self) -> u64 {
        self.inner.index.version().await
    }

    /// Subscribes to [`DriveEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<DriveEvent> {
        self.inner.events.subscribe()
    }

    /// Opens a write sink for `path`, holding the drive-wide append lock
    /// until the sink finishes or drops.
    ///
    /// Bytes go to the content log as they are written; the stat that
    /// makes them reachable is committed by [`WriteStream::finish`]. A
    /// sink dropped early leaves its bytes orphaned in the content log
    /// and the index unchanged.
    pub async fn write_stream(
        &self,
        path: &str,
        options: StatOptions,
    ) -> Result<WriteStream, DriveError> {
        self.ensure_open()?;
        if self.inner.index.read_only() {
            return Err(DriveError::NotWritable);
        }
        let content = self.inner.content().await?;
        if !content.writable() {
            return Err(DriveError::NotWritable);
        }

        let key = normalize(path);
        let _ = self.inner.events.send(DriveEvent::Appending {
            path: key.clone(),
            options,
        });

        let mut guard = self.inner.append_lock.clone().lock_owned().await;
        // The lock serializes appends, so the live log counters are the
        // write's base offsets.
        let (length, byte_length) = content.lengths().await;
        guard.length = length;
        guard.byte_length = byte_length;

        Ok(WriteStream::new(
            self.inner.clone(),
            content,
            guard,
            key,
            options,
        ))
    }

    /// Writes a whole buffer, splitting it into 64 KiB content blocks.
    pub async fn write_file(
        &self,
        path: &str,
        data: impl Into<Bytes>,
    ) -> Result<Stat, DriveError> {
        self.write_file_with(path, data, StatOptions::default()).await
    }

    /// [`Drive::write_file`] with explicit stat options.
    pub async fn write_file_with(
        &self,
        path: &str,
        data: impl Into<Bytes>,
        options: StatOptions,
    ) -> Result<Stat, DriveError> {
        let data = data.into();
        let mut sink = self.write_stream(path, options).await?;
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + WRITE_CHUNK).min(data.len());
            sink.write(data.slice(offset..end)).await?;
            offset = end;
        }
        sink.finish().await
    }

    /// Streams a file's bytes. Fails `FileNotFound` when no index entry
    /// exists at the path.
    pub async fn read_stream(
        &self,
        path: &str,
        options: ReadOptions,
    ) -> Result<ByteStream, DriveError> {
        self.ensure_open()?;
        let key = normalize(path);
        let stat = match self.inner.index.get(&key).await? {
            Some(bytes) => Stat::decode(&bytes)?,
            None => return Err(DriveError::FileNotFound(path.to_string())),
        };

        let start = options.start.unwrap_or(0);
        let byte_length = options.length.unwrap_or(stat.size).saturating_sub(start);
        if byte_length == 0 {
            return Ok(futures::stream::empty().boxed());
        }

        let content = self.inner.content().await?;
        Ok(content.read_stream(ReadStreamOptions {
            block_offset: stat.offset,
            block_length: stat.blocks,
            byte_offset: stat.byte_offset + start,
            byte_length,
        }))
    }

    /// Reads a whole file into memory.
    pub async fn read_file(&self, path: &str) -> Result<Bytes, DriveError> {
        let mut stream = self.read_stream(path, ReadOptions::default()).await?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Reads a whole file and decodes it as UTF-8.
    pub async fn read_file_utf8(&self, path: &str) -> Result<String, DriveError> {
        let bytes = self.read_file(path).await?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    /// Records a directory at `path`. Consumes no content-log bytes; the
    /// stat snapshots the current content position.
    pub async fn mkdir(&self, path: &str, options: StatOptions) -> Result<(), DriveError> {
        self.ensure_open()?;
        if self.inner.index.read_only() {
            return Err(DriveError::NotWritable);
        }
        let content = self.inner.content().await?;
        let (length, byte_length) = content.lengths().await;
        let stat = Stat::directory(length, byte_length, stamp(options));
        self.inner
            .index
            .put(&normalize(path), stat.encode()?)
            .await?;
        Ok(())
    }

    /// Resolves the stat for `path`.
    ///
    /// A path with entries underneath but no record of its own resolves
    /// to a synthesized directory stat.
    pub async fn stat(&self, path: &str) -> Result<Stat, DriveError> {
        self.ensure_open()?;
        let key = normalize(path);
        match self.inner.index.get(&key).await? {
            Some(bytes) => Ok(Stat::decode(&bytes)?),
            None => {
                if self.inner.index.first_child(&key).await?.is_some() {
                    Ok(Stat::directory(0, 0, StatOptions::default()))
                } else {
                    Err(DriveError::FileNotFound(path.to_string()))
                }
            }
        }
    }

    /// Identical to [`Drive::stat`]; symlinks are not modeled.
    pub async fn lstat(&self, path: &str) -> Result<Stat, DriveError> {
        self.stat(path).await
    }

    /// Succeeds iff `path` resolves.
    pub async fn access(&self, path: &str) -> Result<(), DriveError> {
        self.stat(path).await.map(|_| ())
    }

    pub async fn exists(&self, path: &str) -> Result<bool, DriveError> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(DriveError::FileNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Lists the immediate children of a directory as bare names,
    /// deduplicated and sorted.
    pub async fn readdir(&self, path: &str) -> Result<Vec<String>, DriveError> {
        self.ensure_open()?;
        let key = normalize(path);
        let entries = self.inner.index.entries_under(&key).await?;

        let mut names = BTreeSet::new();
        for (entry, _) in entries {
            if entry == key {
                continue;
            }
            let relative = if key.is_empty() {
                entry.as_str()
            } else {
                &entry[key.len() + 1..]
            };
            let first = relative.split('/').next().unwrap_or(relative);
            names.insert(first.to_string());
        }
        Ok(names.into_iter().collect())
    }

    /// Removes the index entry at `path`. The content-log bytes it
    /// referenced stay in the log; append-only storage is never
    /// reclaimed.
    pub async fn unlink(&self, path: &str) -> Result<(), DriveError> {
        self.ensure_open()?;
        let key = normalize(path);
        self.inner.index.del(&key).await.map_err(|err| match err {
            IndexError::KeyNotFound(_) => DriveError::FileNotFound(path.to_string()),
            other => other.into(),
        })
    }

    /// Removes an empty directory.
    pub async fn rmdir(&self, path: &str) -> Result<(), DriveError> {
        self.ensure_open()?;
        let key = normalize(path);
        if self.inner.index.first_child(&key).await?.is_some() {
            return Err(DriveError::DirectoryNotEmpty(path.to_string()));
        }
        self.unlink(path).await
    }

    /// Subscribes to index changes at or under `path`.
    pub fn watch(&self, path: &str) -> DriveWatcher {
        DriveWatcher {
            inner: self.inner.index.watch(normalize(path)),
        }
    }

    /// Replicates this drive over a bidirectional transport, declaring
    /// both logs to the peer.
    ///
    /// The metadata log attaches immediately; the content log attaches as
    /// soon as it is available, which for a key-only drive can be in the
    /// middle of the session, right after the header block arrives. Runs
    /// until the transport closes or errors.
    pub async fn replicate<T>(&self, transport: T) -> Result<(), DriveError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        self.ensure_open()?;
        let replicator = Replicator::new(ReplicateOptions { expected_feeds: 2 });
        replicator.add_feed(self.inner.metadata.clone()).await;

        match self.inner.content_now() {
            Some(content) => replicator.add_feed(content).await,
            None => {
                let mut content_rx = self.inner.content_rx.clone();
                let late = replicator.clone();
                tokio::spawn(async move {
                    loop {
                        let feed = match &*content_rx.borrow_and_update() {
                            ContentState::Ready(feed) => Some(feed.clone()),
                            ContentState::Failed(_) => return,
                            ContentState::Pending => None,
                        };
                        if let Some(feed) = feed {
                            late.add_feed(feed).await;
                            return;
                        }
                        if content_rx.changed().await.is_err() {
                            return;
                        }
                    }
                });
            }
        }

        replicator.run(transport).await.map_err(Into::into)
    }

    /// Re-binds the shared logs to an immutable view of the index at a
    /// historical metadata-log length. The checkout skips bootstrap and
    /// is read-only; parent writes after this point are invisible to it.
    pub async fn checkout(&self, version: u64) -> Result<Drive, DriveError> {
        self.ensure_open()?;
        // Both logs must exist to share them.
        let Some(content) = self.inner.content_now() else {
            return Err(DriveError::InvalidCheckout);
        };
        let index = self.inner.index.checkout(version).await?;

        let (events, _) = broadcast::channel(256);
        let (content_tx, content_rx) = watch::channel(ContentState::Ready(content.clone()));
        let (close_tx, _) = watch::channel(false);
        let (length, byte_length) = content.lengths().await;

        let inner = Arc::new(DriveInner {
            metadata: self.inner.metadata.clone(),
            index,
            content_rx,
            content_tx,
            append_lock: Arc::new(Mutex::new(ContentCursor {
                length,
                byte_length,
            })),
            events,
            close_tx,
            closed: AtomicBool::new(false),
            is_checkout: true,
        });
        spawn_update_forwarder(&inner);
        Ok(Drive { inner })
    }

    /// Flushes and closes the metadata log, then the content log.
    ///
    /// A checkout's close leaves the shared logs open for its parent;
    /// the logs fully release once the last drive holding them drops.
    pub async fn close(&self) -> Result<(), DriveError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.inner.close_tx.send(true);
        // Release anything still waiting on content readiness.
        if matches!(&*self.inner.content_rx.borrow(), ContentState::Pending) {
            let _ = self
                .inner
                .content_tx
                .send(ContentState::Failed("drive is closed".to_string()));
        }
        if !self.inner.is_checkout {
            self.inner.metadata.close().await?;
            if let Some(content) = self.inner.content_now() {
                content.close().await?;
            }
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), DriveError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DriveError::Closed);
        }
        Ok(())
    }
}

/// Change notifications for one path prefix. Dropping it unsubscribes.
pub struct DriveWatcher {
    inner: IndexWatcher,
}

impl DriveWatcher {
    /// Waits for the next change at or under the watched path, returning
    /// the changed index key. Returns `None` once the drive is gone.
    pub async fn changed(&mut self) -> Option<String> {
        self.inner.changed().await
    }
}

/// Fills in the write timestamp for stats the caller did not stamp.
pub(crate) fn stamp(mut options: StatOptions) -> StatOptions {
    let now = Utc::now().timestamp_millis() as u64;
    options.mtime.get_or_insert(now);
    options.ctime.get_or_insert(now);
    options
}

fn derive_metadata_content_keypair(
    metadata: &Feed,
) -> Result<peerdrive_core::Keypair, DriveError> {
    let secret = metadata
        .secret_key()
        .ok_or_else(|| bootstrap_err(anyhow::anyhow!("writable metadata log has no secret key")))?;
    Ok(derive_content_keypair(&secret))
}

fn content_key_from_header(key_bytes: &Bytes) -> Result<[u8; PUBLIC_KEY_SIZE], DriveError> {
    key_bytes
        .as_ref()
        .try_into()
        .map_err(|_| bootstrap_err(anyhow::anyhow!("metadata header does not hold a content key")))
}

async fn open_content_readonly(
    factory: &Arc<dyn StorageFactory>,
    key: [u8; PUBLIC_KEY_SIZE],
) -> Result<Arc<Feed>, DriveError> {
    Feed::open(
        factory,
        FeedOptions {
            key: Some(key),
            secret_key: None,
            create_if_missing: true,
        },
    )
    .await
    .map_err(bootstrap_err)
}

/// Forwards metadata-log appends as drive `Update` events. Ends when the
/// drive closes or drops.
fn spawn_update_forwarder(inner: &Arc<DriveInner>) {
    let mut events = inner.metadata.subscribe();
    let sender = inner.events.clone();
    let mut close_rx = inner.close_tx.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = close_rx.changed() => {
                    if changed.is_err() || *close_rx.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(FeedEvent::Append { length }) => {
                        let _ = sender.send(DriveEvent::Update { length });
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
}

/// For a key-only drive whose metadata log is still empty: waits for the
/// first replicated block, reads the content key out of the header, and
/// publishes the content log.
fn spawn_content_waiter(inner: &Arc<DriveInner>, content_factory: Arc<dyn StorageFactory>) {
    let weak = Arc::downgrade(inner);
    let metadata = inner.metadata.clone();
    let mut events = metadata.subscribe();
    let mut close_rx = inner.close_tx.subscribe();

    tokio::spawn(async move {
        loop {
            if metadata.length().await > 0 {
                break;
            }
            tokio::select! {
                changed = close_rx.changed() => {
                    if changed.is_err() || *close_rx.borrow() {
                        return;
                    }
                }
                event = events.recv() => match event {
                    Ok(FeedEvent::Append { .. }) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }

        let Some(inner) = weak.upgrade() else { return };

        let opened = async {
            let key_bytes = inner.index.metadata().await?.ok_or_else(|| {
                DriveError::Bootstrap(anyhow::anyhow!("metadata header carries no content key"))
            })?;
            let key = content_key_from_header(&key_bytes)?;
            open_content_readonly(&content_factory, key).await
        }
        .await;

        match opened {
            Ok(content) => {
                let (length, byte_length) = content.lengths().await;
                {
                    let mut cursor = inner.append_lock.lock().await;
                    cursor.length = length;
                    cursor.byte_length = byte_length;
                }
                let _ = inner.content_tx.send(ContentState::Ready(content));
                let _ = inner.events.send(DriveEvent::Content);
            }
            Err(err) => {
                warn!(error = %err, "content log bootstrap failed");
                let _ = inner.content_tx.send(ContentState::Failed(err.to_string()));
                let _ = inner.events.send(DriveEvent::Error {
                    message: err.to_string(),
                });
            }
        }
    });
}

fn short_hex(bytes: &[u8]) -> String {
    bytes.iter().take(5).map(|b| format!("{b:02x}")).collect()
}
