//! The metadata log's reserved header block.
//!
//! Block 0 of the metadata log identifies the block sequence as a
//! peerdrive index and carries an opaque metadata payload. For a drive the
//! payload is the content log's 32-byte public key, which is how a reader
//! that only knows the drive key locates the content log.

use bytes::Bytes;
use minicbor::{CborLen, Decode, Encode, bytes::ByteVec};

/// Magic string identifying an index header block.
pub const INDEX_MAGIC: &str = "pd/index";

#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    #[error("header encoding failed: {0}")]
    Encode(String),

    #[error("header decoding failed: {0}")]
    Decode(#[from] minicbor::decode::Error),

    #[error("not an index header (magic {0:?})")]
    BadMagic(String),
}

/// Header block contents.
#[derive(Encode, Decode, CborLen, Clone, Debug, PartialEq, Eq)]
#[cbor(array)]
pub struct IndexHeader {
    #[n(0)]
    magic: String,
    #[n(1)]
    metadata: Option<ByteVec>,
}

impl IndexHeader {
    pub fn new(metadata: Option<Bytes>) -> Self {
        Self {
            magic: INDEX_MAGIC.to_string(),
            metadata: metadata.map(|b| b.to_vec().into()),
        }
    }

    /// The opaque payload stored alongside the magic, if any.
    pub fn metadata(&self) -> Option<Bytes> {
        self.metadata
            .as_ref()
            .map(|b| Bytes::copy_from_slice(b.as_slice()))
    }

    pub fn encode(&self) -> Result<Bytes, HeaderError> {
        let mut buf = Vec::new();
        minicbor::encode(self, &mut buf).map_err(|e| HeaderError::Encode(e.to_string()))?;
        Ok(buf.into())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, HeaderError> {
        let header: IndexHeader = minicbor::decode(bytes)?;
        if header.magic != INDEX_MAGIC {
            return Err(HeaderError::BadMagic(header.magic));
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_metadata() {
        let key = Bytes::from(vec![7u8; 32]);
        let header = IndexHeader::new(Some(key.clone()));
        let decoded = IndexHeader::decode(&header.encode().unwrap()).unwrap();
        assert_eq!(decoded.metadata(), Some(key));
    }

    #[test]
    fn roundtrip_without_metadata() {
        let header = IndexHeader::new(None);
        let decoded = IndexHeader::decode(&header.encode().unwrap()).unwrap();
        assert_eq!(decoded.metadata(), None);
    }

    #[test]
    fn rejects_foreign_blocks() {
        let other = IndexHeader {
            magic: "something/else".to_string(),
            metadata: None,
        };
        let bytes = other.encode().unwrap();
        assert!(matches!(
            IndexHeader::decode(&bytes),
            Err(HeaderError::BadMagic(_))
        ));
    }
}
