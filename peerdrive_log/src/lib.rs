//! Append-only signed block logs ("feeds").
//!
//! A feed is a sequence of blocks persisted through a set of named
//! random-access storage handles. Every append extends a hash chain over
//! the block contents and signs the new chain root with the feed's
//! Ed25519 secret key, so extension requires the secret key while
//! verification requires only the public key.
//!
//! Feeds replicate over any bidirectional byte stream: see
//! [`replication::Replicator`]. Several feeds can share one transport,
//! which is how a drive ships its metadata and content logs over a single
//! peer connection.

pub mod feed;
pub mod replication;

pub use feed::{ByteStream, Feed, FeedError, FeedEvent, FeedOptions, ReadStreamOptions};
pub use replication::{ReplicateOptions, ReplicationError, Replicator};
