//! Read options and the lock-holding write sink.

use crate::drive::{ContentCursor, DriveError, DriveEvent, DriveInner, stamp};
use bytes::Bytes;
use peerdrive_core::{Stat, StatOptions};
use peerdrive_log::Feed;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::trace;

/// Byte-window options for [`crate::Drive::read_stream`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadOptions {
    /// Byte offset into the file to start at.
    pub start: Option<u64>,
    /// Total bytes to read; defaults to the file size.
    pub length: Option<u64>,
}

/// A write sink over the content log.
///
/// Holds the drive-wide append lock for its whole lifetime, so the byte
/// range it produces is contiguous and exclusively its own. Bytes become
/// reachable only when [`WriteStream::finish`] commits the stat; dropping
/// the sink early releases the lock and leaves any appended bytes
/// orphaned in the content log.
pub struct WriteStream {
    inner: Arc<DriveInner>,
    content: Arc<Feed>,
    guard: Option<OwnedMutexGuard<ContentCursor>>,
    path: String,
    options: StatOptions,
    /// Content-log position when the sink opened.
    offset: u64,
    byte_offset: u64,
}

impl WriteStream {
    pub(crate) fn new(
        inner: Arc<DriveInner>,
        content: Arc<Feed>,
        guard: OwnedMutexGuard<ContentCursor>,
        path: String,
        options: StatOptions,
    ) -> Self {
        let offset = guard.length;
        let byte_offset = guard.byte_length;
        Self {
            inner,
            content,
            guard: Some(guard),
            path,
            options,
            offset,
            byte_offset,
        }
    }

    /// The normalized path this sink writes to.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Appends one chunk as a content-log block. Empty chunks are
    /// ignored.
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> Result<(), DriveError> {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        if self.guard.is_none() {
            return Err(DriveError::Closed);
        }
        self.content.append(chunk).await?;
        Ok(())
    }

    /// Commits the stat for everything written, updates the drive's
    /// cached content counters, and releases the append lock.
    ///
    /// The stat lands in the index before the lock releases, so every
    /// range the index references is already committed to the content
    /// log.
    pub async fn finish(mut self) -> Result<Stat, DriveError> {
        let mut guard = self.guard.take().ok_or(DriveError::Closed)?;

        let (length, byte_length) = self.content.lengths().await;
        let blocks = length - self.offset;
        let size = byte_length - self.byte_offset;

        let stat = Stat::file(
            self.offset,
            self.byte_offset,
            blocks,
            size,
            stamp(self.options),
        );
        self.inner.index.put(&self.path, stat.encode()?).await?;

        guard.length = length;
        guard.byte_length = byte_length;
        drop(guard);

        trace!(path = %self.path, size, blocks, "write committed");
        let _ = self.inner.events.send(DriveEvent::Append {
            path: self.path.clone(),
            options: self.options,
        });
        Ok(stat)
    }
}
