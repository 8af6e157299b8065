//! Core peerdrive protocol types and traits.
//!
//! This crate defines the shared types used by all peerdrive crates.
//!
//! ## Protocol types (wire-stable)
//!
//! The following modules define persistent formats that are intended to be
//! stable for the 1.0 protocol:
//!
//! - Per-path metadata records (`stat::Stat`)
//! - The metadata-log header block (`header::IndexHeader`)
//! - Content-keypair and discovery-key derivation (`keys`)
//!
//! These types end up inside log blocks that are replicated between peers;
//! changes to them are protocol changes. Two implementations interoperate
//! only if their stat encodings round-trip byte-identically.
//!
//! ## Convenience APIs (non-wire)
//!
//! In addition, this crate exposes the random-access storage abstraction
//! (`storage::RandomAccess`, `storage::StorageFactory`) that the log layer
//! builds on, and a storage conformance suite (`testutil`, behind the
//! `testutil` feature) for backend crates.

pub mod header;
pub mod keys;
pub mod stat;
pub mod storage;

#[cfg(feature = "testutil")]
pub mod testutil;

pub use header::IndexHeader;
pub use keys::{Keypair, derive_content_keypair, discovery_key};
pub use stat::{Stat, StatError, StatKind, StatOptions};
pub use storage::{RandomAccess, StorageFactory, StorageResult};

/// Size of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 secret key (seed plus public half) in bytes.
pub const SECRET_KEY_SIZE: usize = 64;

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;
