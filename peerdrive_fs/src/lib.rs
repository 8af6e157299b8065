//! # Peerdrive
//!
//! A versioned, peer-to-peer drive: POSIX-shaped file operations over two
//! signed append-only logs that replicate to other peers.
//!
//! Every drive binds a *metadata log*, whose blocks hold a persistent
//! path index, and a *content log*, which carries raw file bytes. A write
//! appends bytes to the content log and then records the produced byte
//! range in the index; a read resolves the index record and streams that
//! range back out. Both logs share one root of trust: the content log's
//! keypair is derived from the metadata log's secret key, and readers
//! that only hold the drive's public key recover the content key from the
//! metadata header.
//!
//! ## Layers
//! 1. `storage` – binds a storage descriptor to the two logs' backends.
//! 2. `drive`   – bootstrap, the filesystem surface, events, checkout.
//! 3. `io`      – the lock-holding write sink and read conveniences.
//!
//! ```rust,no_run
//! use peerdrive_fs::{Drive, DriveOptions};
//! use tempfile::tempdir;
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let dir = tempdir()?;
//! let drive = Drive::open(dir.path(), DriveOptions::default()).await?;
//! drive.write_file("/hello.txt", "hello world").await?;
//! let text = drive.read_file_utf8("/hello.txt").await?;
//! assert_eq!(text, "hello world");
//! # Ok(()) }
//! ```

mod drive;
mod io;
mod path;
mod storage;

pub use drive::{Drive, DriveError, DriveEvent, DriveOptions, DriveWatcher};
pub use io::{ReadOptions, WriteStream};
pub use peerdrive_core::{Stat, StatKind, StatOptions};
pub use storage::DriveStorage;
