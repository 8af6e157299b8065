//! Feed replication over a bidirectional byte stream.
//!
//! The protocol is symmetric: both peers run the same session over any
//! `AsyncRead + AsyncWrite` transport. Frames are a big-endian u32 length
//! prefix followed by one CBOR-encoded [`Message`]. Feeds are addressed by
//! discovery key, so a peer never learns a public key it does not already
//! hold.
//!
//! Each side announces its feeds with `Open`, answers announcements with
//! `Have`, requests blocks it is missing strictly in order, and verifies
//! every received block against the feed's hash chain before appending.
//! Local appends push a `Have` to the peer, so a live session converges
//! without polling. A writable feed is the source of truth for itself and
//! never applies remote data.

use crate::feed::{Feed, FeedError, FeedEvent};
use bytes::Bytes;
use minicbor::{CborLen, Decode, Encode, bytes::ByteVec};
use peerdrive_core::SIGNATURE_SIZE;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{Mutex, mpsc},
};
use tracing::{debug, trace, warn};

/// Protocol identifier carried in the handshake.
pub const PROTOCOL: &str = "pd/replicate/0";

/// Upper bound on a single frame, body included.
const MAX_FRAME: u64 = 8 * 1024 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum ReplicationError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("message encoding failed: {0}")]
    Encode(String),

    #[error("message decoding failed: {0}")]
    Decode(String),

    #[error("peer speaks {theirs:?}, expected {ours:?}")]
    ProtocolMismatch { ours: String, theirs: String },

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(u64),

    #[error("replication session already running")]
    AlreadyRunning,

    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// Session parameters.
#[derive(Clone, Copy, Debug)]
pub struct ReplicateOptions {
    /// How many feeds this side intends to attach. A drive declares 2 so
    /// the peer knows both logs must complete.
    pub expected_feeds: u8,
}

impl Default for ReplicateOptions {
    fn default() -> Self {
        Self { expected_feeds: 1 }
    }
}

#[derive(Encode, Decode, CborLen, Clone, Debug)]
#[cbor(array)]
pub struct Handshake {
    #[n(0)]
    pub protocol: String,
    #[n(1)]
    pub expected_feeds: u8,
}

/// Feed announcement: "this is how long my copy is".
#[derive(Encode, Decode, CborLen, Clone, Debug)]
#[cbor(array)]
pub struct Announce {
    #[n(0)]
    #[cbor(with = "minicbor::bytes")]
    pub discovery_key: [u8; 32],
    #[n(1)]
    pub length: u64,
}

#[derive(Encode, Decode, CborLen, Clone, Debug)]
#[cbor(array)]
pub struct BlockRequest {
    #[n(0)]
    #[cbor(with = "minicbor::bytes")]
    pub discovery_key: [u8; 32],
    #[n(1)]
    pub index: u64,
}

#[derive(Encode, Decode, CborLen, Clone, Debug)]
#[cbor(array)]
pub struct BlockData {
    #[n(0)]
    #[cbor(with = "minicbor::bytes")]
    pub discovery_key: [u8; 32],
    #[n(1)]
    pub index: u64,
    #[n(2)]
    pub block: ByteVec,
    #[n(3)]
    #[cbor(with = "minicbor::bytes")]
    pub signature: [u8; SIGNATURE_SIZE],
}

#[derive(Encode, Decode, CborLen, Clone, Debug)]
#[cbor(flat)]
pub enum Message {
    #[n(0)]
    Handshake(#[n(0)] Handshake),
    #[n(1)]
    Open(#[n(0)] Announce),
    #[n(2)]
    Have(#[n(0)] Announce),
    #[n(3)]
    Request(#[n(0)] BlockRequest),
    #[n(4)]
    Data(#[n(0)] BlockData),
}

struct Channel {
    feed: Arc<Feed>,
    remote_length: u64,
    inflight: Option<u64>,
}

struct ReplicatorInner {
    channels: Mutex<HashMap<[u8; 32], Channel>>,
    outgoing: mpsc::UnboundedSender<Message>,
    incoming: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
}

/// A replication session over one transport, multiplexing any number of
/// feeds. Cheap to clone; feeds may be attached before or after the
/// session starts running.
#[derive(Clone)]
pub struct Replicator {
    inner: Arc<ReplicatorInner>,
}

impl Replicator {
    pub fn new(options: ReplicateOptions) -> Self {
        let (outgoing, incoming) = mpsc::unbounded_channel();
        // Queued first so it precedes any feed announcement on the wire.
        let _ = outgoing.send(Message::Handshake(Handshake {
            protocol: PROTOCOL.to_string(),
            expected_feeds: options.expected_feeds,
        }));
        Self {
            inner: Arc::new(ReplicatorInner {
                channels: Mutex::new(HashMap::new()),
                outgoing,
                incoming: Mutex::new(Some(incoming)),
            }),
        }
    }

    /// Attaches a feed to the session and announces it to the peer.
    ///
    /// Also subscribes to the feed's append events so later local appends
    /// are pushed to the peer as `Have` announcements.
    pub async fn add_feed(&self, feed: Arc<Feed>) {
        let discovery_key = feed.discovery_key();
        let length = feed.length().await;
        {
            let mut channels = self.inner.channels.lock().await;
            channels.insert(
                discovery_key,
                Channel {
                    feed: feed.clone(),
                    remote_length: 0,
                    inflight: None,
                },
            );
        }

        let _ = self.inner.outgoing.send(Message::Open(Announce {
            discovery_key,
            length,
        }));

        let outgoing = self.inner.outgoing.clone();
        let mut events = feed.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(FeedEvent::Append { length }) => {
                        let have = Message::Have(Announce {
                            discovery_key,
                            length,
                        });
                        if outgoing.send(have).is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Runs the session until the transport closes or errors.
    ///
    /// Returns `Ok(())` on a clean shutdown at a frame boundary. Can only
    /// be called once per replicator.
    pub async fn run<T>(&self, transport: T) -> Result<(), ReplicationError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut incoming = self
            .inner
            .incoming
            .lock()
            .await
            .take()
            .ok_or(ReplicationError::AlreadyRunning)?;

        let (mut reader, mut writer) = tokio::io::split(transport);

        let write_loop = async {
            while let Some(message) = incoming.recv().await {
                write_frame(&mut writer, &message).await?;
            }
            Ok::<(), ReplicationError>(())
        };

        let read_loop = async {
            loop {
                match read_frame(&mut reader).await? {
                    None => return Ok::<(), ReplicationError>(()),
                    Some(message) => self.handle(message).await?,
                }
            }
        };

        tokio::select! {
            result = write_loop => result,
            result = read_loop => result,
        }
    }

    async fn handle(&self, message: Message) -> Result<(), ReplicationError> {
        match message {
            Message::Handshake(handshake) => {
                if handshake.protocol != PROTOCOL {
                    return Err(ReplicationError::ProtocolMismatch {
                        ours: PROTOCOL.to_string(),
                        theirs: handshake.protocol,
                    });
                }
                debug!(
                    expected_feeds = handshake.expected_feeds,
                    "replication handshake"
                );
            }
            Message::Open(announce) => {
                let response = {
                    let mut channels = self.inner.channels.lock().await;
                    match channels.get_mut(&announce.discovery_key) {
                        Some(channel) => {
                            channel.remote_length = channel.remote_length.max(announce.length);
                            Some(Message::Have(Announce {
                                discovery_key: announce.discovery_key,
                                length: channel.feed.length().await,
                            }))
                        }
                        // Not attached yet; our own later Open will
                        // resynchronize this feed.
                        None => None,
                    }
                };
                if let Some(response) = response {
                    let _ = self.inner.outgoing.send(response);
                }
                self.request_next(announce.discovery_key).await;
            }
            Message::Have(announce) => {
                let mut channels = self.inner.channels.lock().await;
                if let Some(channel) = channels.get_mut(&announce.discovery_key) {
                    channel.remote_length = channel.remote_length.max(announce.length);
                }
                drop(channels);
                self.request_next(announce.discovery_key).await;
            }
            Message::Request(request) => {
                let feed = {
                    let channels = self.inner.channels.lock().await;
                    channels.get(&request.discovery_key).map(|c| c.feed.clone())
                };
                let Some(feed) = feed else {
                    return Ok(());
                };
                if request.index >= feed.length().await {
                    // Stale request; the peer will re-learn our length.
                    return Ok(());
                }
                let block = feed.get(request.index).await?;
                let signature = feed.signature(request.index).await?;
                trace!(index = request.index, "serving block");
                let _ = self.inner.outgoing.send(Message::Data(BlockData {
                    discovery_key: request.discovery_key,
                    index: request.index,
                    block: block.to_vec().into(),
                    signature,
                }));
            }
            Message::Data(data) => {
                let feed = {
                    let mut channels = self.inner.channels.lock().await;
                    match channels.get_mut(&data.discovery_key) {
                        Some(channel) => {
                            channel.inflight = None;
                            channel.feed.clone()
                        }
                        None => return Ok(()),
                    }
                };
                if feed.writable() {
                    // We are the author of this feed.
                    warn!("peer sent data for a writable feed, ignoring");
                    return Ok(());
                }
                let block = Bytes::from(data.block.to_vec());
                feed.append_verified(data.index, block, data.signature)
                    .await?;
                self.request_next(data.discovery_key).await;
            }
        }
        Ok(())
    }

    /// Requests the next missing block for a feed, one at a time.
    async fn request_next(&self, discovery_key: [u8; 32]) {
        let request = {
            let mut channels = self.inner.channels.lock().await;
            let Some(channel) = channels.get_mut(&discovery_key) else {
                return;
            };
            if channel.feed.writable() || channel.inflight.is_some() {
                return;
            }
            let local = channel.feed.length().await;
            if local >= channel.remote_length {
                return;
            }
            channel.inflight = Some(local);
            Message::Request(BlockRequest {
                discovery_key,
                index: local,
            })
        };
        let _ = self.inner.outgoing.send(request);
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<(), ReplicationError> {
    let mut body = Vec::new();
    minicbor::encode(message, &mut body).map_err(|e| ReplicationError::Encode(e.to_string()))?;
    if body.len() as u64 > MAX_FRAME {
        return Err(ReplicationError::FrameTooLarge(body.len() as u64));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Message>, ReplicationError> {
    let length = match reader.read_u32().await {
        Ok(length) => length as u64,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if length > MAX_FRAME {
        return Err(ReplicationError::FrameTooLarge(length));
    }
    let mut body = vec![0u8; length as usize];
    reader.read_exact(&mut body).await?;
    let message = minicbor::decode(&body).map_err(|e| ReplicationError::Decode(e.to_string()))?;
    Ok(Some(message))
}
