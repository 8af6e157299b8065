//! Per-path metadata records.
//!
//! A `Stat` is the value stored in the drive's metadata index, one per
//! path. File stats carry the byte range the file occupies in the content
//! log; directory stats record the content-log position at creation time
//! but never consume content bytes.
//!
//! The encoding is a CBOR map with small integer keys. Field order is
//! fixed, so encoding is deterministic; unknown keys are skipped on
//! decode, so older readers tolerate newer writers.

use bytes::Bytes;
use minicbor::{CborLen, Decode, Encode};

/// Default mode bits for files (advisory, never enforced).
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Default mode bits for directories (advisory, never enforced).
pub const DEFAULT_DIRECTORY_MODE: u32 = 0o755;

#[derive(thiserror::Error, Debug)]
pub enum StatError {
    #[error("stat encoding failed: {0}")]
    Encode(String),

    #[error("stat decoding failed: {0}")]
    Decode(#[from] minicbor::decode::Error),
}

/// Whether a path names a file or a directory.
#[repr(u8)]
#[derive(Encode, Decode, CborLen, Clone, Copy, Debug, PartialEq, Eq)]
#[cbor(index_only)]
pub enum StatKind {
    #[n(0)]
    File = 0,
    #[n(1)]
    Directory = 1,
}

/// The metadata record stored for a single path.
///
/// For a file, `offset`/`byte_offset` locate the first content-log block
/// and byte of its data, and `blocks`/`size` give the extent. The content
/// log is append-only, so a committed range is never rewritten.
#[derive(Encode, Decode, CborLen, Clone, Debug, PartialEq, Eq)]
#[cbor(map)]
pub struct Stat {
    #[n(0)]
    pub kind: StatKind,
    #[n(1)]
    pub mode: u32,
    #[n(2)]
    pub uid: u32,
    #[n(3)]
    pub gid: u32,
    /// File size in bytes. Always 0 for directories.
    #[n(4)]
    pub size: u64,
    /// Number of content-log blocks occupied. Always 0 for directories.
    #[n(5)]
    pub blocks: u64,
    /// First content-log block index.
    #[n(6)]
    pub offset: u64,
    /// First content-log byte offset.
    #[n(7)]
    pub byte_offset: u64,
    #[n(8)]
    pub mtime: u64,
    #[n(9)]
    pub ctime: u64,
}

/// Caller-supplied overrides for the advisory stat fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatOptions {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mtime: Option<u64>,
    pub ctime: Option<u64>,
}

impl Stat {
    /// Builds a file stat for the given content-log range.
    pub fn file(offset: u64, byte_offset: u64, blocks: u64, size: u64, opts: StatOptions) -> Self {
        Self {
            kind: StatKind::File,
            mode: opts.mode.unwrap_or(DEFAULT_FILE_MODE),
            uid: opts.uid.unwrap_or(0),
            gid: opts.gid.unwrap_or(0),
            size,
            blocks,
            offset,
            byte_offset,
            mtime: opts.mtime.unwrap_or(0),
            ctime: opts.ctime.unwrap_or(0),
        }
    }

    /// Builds a directory stat snapshotting the current content-log
    /// position. Directories occupy no content bytes.
    pub fn directory(offset: u64, byte_offset: u64, opts: StatOptions) -> Self {
        Self {
            kind: StatKind::Directory,
            mode: opts.mode.unwrap_or(DEFAULT_DIRECTORY_MODE),
            uid: opts.uid.unwrap_or(0),
            gid: opts.gid.unwrap_or(0),
            size: 0,
            blocks: 0,
            offset,
            byte_offset,
            mtime: opts.mtime.unwrap_or(0),
            ctime: opts.ctime.unwrap_or(0),
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == StatKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == StatKind::Directory
    }

    pub fn encode(&self) -> Result<Bytes, StatError> {
        let mut buf = Vec::new();
        minicbor::encode(self, &mut buf).map_err(|e| StatError::Encode(e.to_string()))?;
        Ok(buf.into())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StatError> {
        Ok(minicbor::decode(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> Stat {
        Stat::file(
            3,
            200_000,
            4,
            65_536,
            StatOptions {
                mode: Some(0o600),
                uid: Some(1000),
                gid: Some(1000),
                mtime: Some(1_700_000_000),
                ctime: Some(1_700_000_000),
            },
        )
    }

    #[test]
    fn file_defaults() {
        let stat = Stat::file(0, 0, 1, 5, StatOptions::default());
        assert!(stat.is_file());
        assert_eq!(stat.mode, DEFAULT_FILE_MODE);
        assert_eq!(stat.uid, 0);
        assert_eq!(stat.size, 5);
        assert_eq!(stat.blocks, 1);
    }

    #[test]
    fn directory_consumes_no_content() {
        let stat = Stat::directory(7, 9001, StatOptions::default());
        assert!(stat.is_directory());
        assert_eq!(stat.mode, DEFAULT_DIRECTORY_MODE);
        assert_eq!(stat.size, 0);
        assert_eq!(stat.blocks, 0);
        assert_eq!(stat.offset, 7);
        assert_eq!(stat.byte_offset, 9001);
    }

    #[test]
    fn roundtrip() {
        let stat = sample_file();
        let bytes = stat.encode().unwrap();
        let decoded = Stat::decode(&bytes).unwrap();
        assert_eq!(stat, decoded);
    }

    #[test]
    fn reencode_is_byte_identical() {
        let bytes = sample_file().encode().unwrap();
        let reencoded = Stat::decode(&bytes).unwrap().encode().unwrap();
        assert_eq!(bytes, reencoded);
    }

    #[test]
    fn unknown_fields_are_skipped() {
        // A future writer might add fields; encode a superset by hand.
        let stat = sample_file();
        let mut buf = Vec::new();
        let mut enc = minicbor::Encoder::new(&mut buf);
        enc.map(11).unwrap();
        enc.u8(0).unwrap().u8(stat.kind as u8).unwrap();
        enc.u8(1).unwrap().u32(stat.mode).unwrap();
        enc.u8(2).unwrap().u32(stat.uid).unwrap();
        enc.u8(3).unwrap().u32(stat.gid).unwrap();
        enc.u8(4).unwrap().u64(stat.size).unwrap();
        enc.u8(5).unwrap().u64(stat.blocks).unwrap();
        enc.u8(6).unwrap().u64(stat.offset).unwrap();
        enc.u8(7).unwrap().u64(stat.byte_offset).unwrap();
        enc.u8(8).unwrap().u64(stat.mtime).unwrap();
        enc.u8(9).unwrap().u64(stat.ctime).unwrap();
        enc.u8(99).unwrap().str("future").unwrap();

        let decoded = Stat::decode(&buf).unwrap();
        assert_eq!(decoded, stat);
    }
}
