//! The feed: an append-only block log over random-access storage.
//!
//! ## Storage layout
//!
//! One named handle per concern, all opened from the same factory:
//!
//! - `key` - the 32-byte public key
//! - `secret` - the 64-byte secret key (writable feeds only)
//! - `data` - block bytes, concatenated
//! - `offsets` - one big-endian u64 per block: the end byte offset
//! - `roots` - one 32-byte chain root per block
//! - `signatures` - one 64-byte Ed25519 signature per block
//!
//! ## Verification chain
//!
//! `root_0 = blake3(public_key)` and
//! `root_{n+1} = blake3(root_n || le64(n) || blake3(block_n))`. Each
//! append signs the new root. A replica accepts a remote block only after
//! recomputing the chain and checking the signature against the feed's
//! public key.

use bytes::Bytes;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use futures::stream::BoxStream;
use futures::StreamExt;
use peerdrive_core::{
    PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, SIGNATURE_SIZE, discovery_key,
    storage::{RandomAccess, StorageFactory},
};
use std::{io, sync::Arc};
use tokio::sync::{RwLock, broadcast};
use tracing::trace;
use zeroize::Zeroize;

const OFFSET_ENTRY: u64 = 8;
const ROOT_ENTRY: u64 = 32;
const SIGNATURE_ENTRY: u64 = SIGNATURE_SIZE as u64;

#[derive(thiserror::Error, Debug)]
pub enum FeedError {
    #[error("feed is not writable")]
    NotWritable,

    #[error("feed is closed")]
    Closed,

    #[error("supplied key does not match the stored key")]
    KeyMismatch,

    #[error("secret key does not form a valid keypair")]
    InvalidKeyPair,

    #[error("feed has no key and creation was not requested")]
    MissingKey,

    #[error("block {index} out of bounds (length {length})")]
    BlockOutOfBounds { index: u64, length: u64 },

    #[error("invalid signature for block {index}")]
    InvalidSignature { index: u64 },

    #[error("feed storage is corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Emitted on every append, local or replicated.
#[derive(Clone, Debug)]
pub enum FeedEvent {
    Append { length: u64 },
}

/// Options for [`Feed::open`].
#[derive(Default)]
pub struct FeedOptions {
    /// Expected public key. Opening fails if storage holds a different one.
    pub key: Option<[u8; PUBLIC_KEY_SIZE]>,
    /// Secret key; makes the feed writable.
    pub secret_key: Option<[u8; SECRET_KEY_SIZE]>,
    /// Generate a fresh keypair when storage holds none and no key was
    /// supplied.
    pub create_if_missing: bool,
}

/// Byte-range parameters for [`Feed::read_stream`].
#[derive(Clone, Copy, Debug)]
pub struct ReadStreamOptions {
    /// First block of the range.
    pub block_offset: u64,
    /// Number of blocks in the range.
    pub block_length: u64,
    /// Absolute feed byte offset to start at.
    pub byte_offset: u64,
    /// Number of bytes to yield.
    pub byte_length: u64,
}

pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

struct FeedState {
    length: u64,
    byte_length: u64,
    root: [u8; 32],
    closed: bool,
}

/// An append-only signed block log.
pub struct Feed {
    public: [u8; PUBLIC_KEY_SIZE],
    discovery: [u8; 32],
    verifying: VerifyingKey,
    signing: Option<SigningKey>,
    data: Arc<dyn RandomAccess>,
    offsets: Arc<dyn RandomAccess>,
    roots: Arc<dyn RandomAccess>,
    signatures: Arc<dyn RandomAccess>,
    state: RwLock<FeedState>,
    events: broadcast::Sender<FeedEvent>,
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("key", &short_hex(&self.public))
            .field("writable", &self.signing.is_some())
            .finish_non_exhaustive()
    }
}

fn short_hex(bytes: &[u8]) -> String {
    bytes.iter().take(5).map(|b| format!("{b:02x}")).collect()
}

impl Feed {
    /// Opens or creates a feed over the given storage factory.
    pub async fn open<F: StorageFactory + ?Sized>(
        factory: &F,
        options: FeedOptions,
    ) -> Result<Arc<Feed>, FeedError> {
        let key_store = factory.open("key")?;
        let secret_store = factory.open("secret")?;
        let data = factory.open("data")?;
        let offsets = factory.open("offsets")?;
        let roots = factory.open("roots")?;
        let signatures = factory.open("signatures")?;

        let stored_public = read_exact_opt(&*key_store, PUBLIC_KEY_SIZE as u64).await?;
        let stored_secret = read_exact_opt(&*secret_store, SECRET_KEY_SIZE as u64).await?;

        let (public, signing) = match stored_public {
            Some(stored) => {
                let public: [u8; PUBLIC_KEY_SIZE] =
                    stored.as_ref().try_into().map_err(|_| FeedError::Corrupt(
                        "stored public key has wrong length".into(),
                    ))?;
                if let Some(expected) = options.key {
                    if expected != public {
                        return Err(FeedError::KeyMismatch);
                    }
                }
                let secret = stored_secret
                    .map(|s| {
                        s.as_ref()
                            .try_into()
                            .map_err(|_| FeedError::Corrupt("stored secret key has wrong length".into()))
                    })
                    .transpose()?
                    .or(options.secret_key);
                let signing = secret.map(signing_from_secret).transpose()?;
                if let Some(signing) = &signing {
                    if signing.verifying_key().to_bytes() != public {
                        return Err(FeedError::InvalidKeyPair);
                    }
                }
                (public, signing)
            }
            None => {
                let signing = match (options.secret_key, options.key, options.create_if_missing) {
                    (Some(secret), _, _) => Some(signing_from_secret(secret)?),
                    (None, Some(_), _) => None,
                    (None, None, true) => {
                        let mut seed: [u8; 32] = rand::random();
                        let signing = SigningKey::from_bytes(&seed);
                        seed.zeroize();
                        Some(signing)
                    }
                    (None, None, false) => return Err(FeedError::MissingKey),
                };
                let public = match (&signing, options.key) {
                    (Some(signing), expected) => {
                        let public = signing.verifying_key().to_bytes();
                        if let Some(expected) = expected {
                            if expected != public {
                                return Err(FeedError::InvalidKeyPair);
                            }
                        }
                        public
                    }
                    (None, Some(key)) => key,
                    (None, None) => return Err(FeedError::MissingKey),
                };
                key_store.write(0, &public).await?;
                if let Some(signing) = &signing {
                    secret_store.write(0, &signing.to_keypair_bytes()).await?;
                }
                (public, signing)
            }
        };

        let verifying =
            VerifyingKey::from_bytes(&public).map_err(|_| FeedError::InvalidKeyPair)?;

        let state = restore_state(&public, &*offsets, &*roots).await?;
        let (events, _) = broadcast::channel(256);

        trace!(
            length = state.length,
            byte_length = state.byte_length,
            writable = signing.is_some(),
            "feed opened"
        );

        Ok(Arc::new(Feed {
            discovery: discovery_key(&public),
            public,
            verifying,
            signing,
            data,
            offsets,
            roots,
            signatures,
            state: RwLock::new(state),
            events,
        }))
    }

    /// The feed's public key.
    pub fn key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public
    }

    /// A public, non-reversible rendezvous tag for this feed.
    pub fn discovery_key(&self) -> [u8; 32] {
        self.discovery
    }

    /// The 64-byte secret key, if this feed is writable.
    pub fn secret_key(&self) -> Option<[u8; SECRET_KEY_SIZE]> {
        self.signing.as_ref().map(|s| s.to_keypair_bytes())
    }

    pub fn writable(&self) -> bool {
        self.signing.is_some()
    }

    /// Number of blocks in the feed.
    pub async fn length(&self) -> u64 {
        self.state.read().await.length
    }

    /// Total byte length of all blocks.
    pub async fn byte_length(&self) -> u64 {
        self.state.read().await.byte_length
    }

    /// Block count and byte length in one consistent snapshot.
    pub async fn lengths(&self) -> (u64, u64) {
        let state = self.state.read().await;
        (state.length, state.byte_length)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    /// Appends a block, returning the new feed length.
    pub async fn append(&self, block: impl Into<Bytes>) -> Result<u64, FeedError> {
        let block = block.into();
        let signing = self.signing.as_ref().ok_or(FeedError::NotWritable)?;

        let mut state = self.state.write().await;
        if state.closed {
            return Err(FeedError::Closed);
        }
        let root = next_root(&state.root, state.length, &block);
        let signature = signing.sign(&root).to_bytes();
        self.commit(&mut state, block, root, signature).await
    }

    /// Appends a block received from a peer after verifying it against the
    /// feed's public key. Returns false when the block is already present.
    ///
    /// This is the only way a non-writable feed grows.
    pub async fn append_verified(
        &self,
        index: u64,
        block: Bytes,
        signature: [u8; SIGNATURE_SIZE],
    ) -> Result<bool, FeedError> {
        let mut state = self.state.write().await;
        if state.closed {
            return Err(FeedError::Closed);
        }
        if index < state.length {
            return Ok(false);
        }
        if index > state.length {
            // The sync loop requests strictly in order.
            return Err(FeedError::BlockOutOfBounds {
                index,
                length: state.length,
            });
        }

        let root = next_root(&state.root, state.length, &block);
        let sig = Signature::from_bytes(&signature);
        self.verifying
            .verify_strict(&root, &sig)
            .map_err(|_| FeedError::InvalidSignature { index })?;

        self.commit(&mut state, block, root, signature).await?;
        Ok(true)
    }

    async fn commit(
        &self,
        state: &mut FeedState,
        block: Bytes,
        root: [u8; 32],
        signature: [u8; SIGNATURE_SIZE],
    ) -> Result<u64, FeedError> {
        let index = state.length;
        let end = state.byte_length + block.len() as u64;

        self.data.write(state.byte_length, &block).await?;
        self.offsets
            .write(index * OFFSET_ENTRY, &end.to_be_bytes())
            .await?;
        self.roots.write(index * ROOT_ENTRY, &root).await?;
        self.signatures
            .write(index * SIGNATURE_ENTRY, &signature)
            .await?;

        state.length = index + 1;
        state.byte_length = end;
        state.root = root;

        trace!(index, bytes = end, "feed append");
        let _ = self.events.send(FeedEvent::Append {
            length: state.length,
        });
        Ok(state.length)
    }

    /// Reads one block.
    pub async fn get(&self, index: u64) -> Result<Bytes, FeedError> {
        let (start, end) = self.block_range(index).await?;
        let block = self.data.read(start, end - start).await?;
        if block.len() as u64 != end - start {
            return Err(FeedError::Corrupt(format!(
                "data truncated at block {index}"
            )));
        }
        Ok(block)
    }

    /// Reads the stored signature for one block.
    pub async fn signature(&self, index: u64) -> Result<[u8; SIGNATURE_SIZE], FeedError> {
        self.check_bounds(index).await?;
        let bytes = self
            .signatures
            .read(index * SIGNATURE_ENTRY, SIGNATURE_ENTRY)
            .await?;
        bytes
            .as_ref()
            .try_into()
            .map_err(|_| FeedError::Corrupt(format!("signature truncated at block {index}")))
    }

    /// The byte range `[start, end)` a block occupies in the feed.
    pub async fn block_range(&self, index: u64) -> Result<(u64, u64), FeedError> {
        self.check_bounds(index).await?;
        let start = if index == 0 {
            0
        } else {
            self.read_offset(index - 1).await?
        };
        let end = self.read_offset(index).await?;
        Ok((start, end))
    }

    async fn check_bounds(&self, index: u64) -> Result<(), FeedError> {
        let length = self.length().await;
        if index >= length {
            return Err(FeedError::BlockOutOfBounds { index, length });
        }
        Ok(())
    }

    async fn read_offset(&self, index: u64) -> Result<u64, FeedError> {
        let bytes = self.offsets.read(index * OFFSET_ENTRY, OFFSET_ENTRY).await?;
        let arr: [u8; 8] = bytes
            .as_ref()
            .try_into()
            .map_err(|_| FeedError::Corrupt(format!("offsets truncated at block {index}")))?;
        Ok(u64::from_be_bytes(arr))
    }

    /// Streams a verified byte range as block-aligned chunks.
    ///
    /// Blocks entirely before `byte_offset` are skipped without reading
    /// their data; the first and last chunks are trimmed to the window.
    pub fn read_stream(self: Arc<Self>, options: ReadStreamOptions) -> ByteStream {
        struct Cursor {
            feed: Arc<Feed>,
            block: u64,
            end_block: u64,
            byte_offset: u64,
            remaining: u64,
        }

        let cursor = Cursor {
            feed: self,
            block: options.block_offset,
            end_block: options.block_offset.saturating_add(options.block_length),
            byte_offset: options.byte_offset,
            remaining: options.byte_length,
        };

        futures::stream::try_unfold(cursor, |mut cursor| async move {
            loop {
                if cursor.remaining == 0 || cursor.block >= cursor.end_block {
                    return Ok(None);
                }
                let (start, end) = cursor
                    .feed
                    .block_range(cursor.block)
                    .await
                    .map_err(io::Error::other)?;
                if end <= cursor.byte_offset {
                    cursor.block += 1;
                    continue;
                }
                let block = cursor
                    .feed
                    .get(cursor.block)
                    .await
                    .map_err(io::Error::other)?;
                let skip = cursor.byte_offset.saturating_sub(start) as usize;
                let take = (block.len() - skip).min(cursor.remaining as usize);
                let chunk = block.slice(skip..skip + take);

                cursor.block += 1;
                cursor.byte_offset = end;
                cursor.remaining -= take as u64;

                if chunk.is_empty() {
                    continue;
                }
                return Ok(Some((chunk, cursor)));
            }
        })
        .boxed()
    }

    /// Flushes all storage handles and refuses further appends.
    ///
    /// Reads stay available so other holders of the feed (a checkout
    /// drive, a replication session) keep working; the handles themselves
    /// are released when the last holder drops.
    pub async fn close(&self) -> Result<(), FeedError> {
        let mut state = self.state.write().await;
        self.data.sync().await?;
        self.offsets.sync().await?;
        self.roots.sync().await?;
        self.signatures.sync().await?;
        state.closed = true;
        Ok(())
    }
}

fn signing_from_secret(secret: [u8; SECRET_KEY_SIZE]) -> Result<SigningKey, FeedError> {
    SigningKey::from_keypair_bytes(&secret).map_err(|_| FeedError::InvalidKeyPair)
}

fn next_root(root: &[u8; 32], index: u64, block: &[u8]) -> [u8; 32] {
    let block_hash = blake3::hash(block);
    let mut buf = [0u8; 72];
    buf[..32].copy_from_slice(root);
    buf[32..40].copy_from_slice(&index.to_le_bytes());
    buf[40..].copy_from_slice(block_hash.as_bytes());
    *blake3::hash(&buf).as_bytes()
}

async fn read_exact_opt(
    storage: &dyn RandomAccess,
    length: u64,
) -> Result<Option<Bytes>, FeedError> {
    let bytes = storage.read(0, length).await?;
    if bytes.is_empty() {
        Ok(None)
    } else {
        Ok(Some(bytes))
    }
}

async fn restore_state(
    public: &[u8; PUBLIC_KEY_SIZE],
    offsets: &dyn RandomAccess,
    roots: &dyn RandomAccess,
) -> Result<FeedState, FeedError> {
    let length = offsets.len().await? / OFFSET_ENTRY;
    let byte_length = if length > 0 {
        let bytes = offsets
            .read((length - 1) * OFFSET_ENTRY, OFFSET_ENTRY)
            .await?;
        let arr: [u8; 8] = bytes
            .as_ref()
            .try_into()
            .map_err(|_| FeedError::Corrupt("offsets truncated".into()))?;
        u64::from_be_bytes(arr)
    } else {
        0
    };
    let root = if length > 0 {
        let bytes = roots.read((length - 1) * ROOT_ENTRY, ROOT_ENTRY).await?;
        bytes
            .as_ref()
            .try_into()
            .map_err(|_| FeedError::Corrupt("roots truncated".into()))?
    } else {
        *blake3::hash(public).as_bytes()
    };

    Ok(FeedState {
        length,
        byte_length,
        root,
        closed: false,
    })
}
