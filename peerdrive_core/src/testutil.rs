//! Test utilities for storage backends.
//!
//! This module provides a conformance suite that can be run against any
//! `StorageFactory` implementation to verify the `RandomAccess` contract.
//!
//! # Usage
//!
//! In your storage crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! peerdrive_core = { workspace = true, features = ["testutil"] }
//! ```
//!
//! In your test file:
//!
//! ```ignore
//! use peerdrive_core::testutil::StorageTests;
//!
//! #[tokio::test]
//! async fn conformance() {
//!     let factory = MyStorage::new(...);
//!     StorageTests::new(&factory).run_all().await;
//! }
//! ```

use crate::storage::StorageFactory;
use rand::Rng;

/// Conformance suite for `StorageFactory` implementations.
pub struct StorageTests<'a, F> {
    factory: &'a F,
    /// Prefix for test handles to avoid collisions between runs.
    prefix: String,
}

impl<'a, F: StorageFactory> StorageTests<'a, F> {
    pub fn new(factory: &'a F) -> Self {
        let prefix = format!("_test_{}", rand::rng().random::<u32>());
        Self { factory, prefix }
    }

    fn name(&self, name: &str) -> String {
        format!("{}/{}", self.prefix, name)
    }

    /// Runs the full suite, panicking on the first violation.
    pub async fn run_all(&self) {
        self.write_then_read().await;
        self.short_read_at_end().await;
        self.zero_fill_gap().await;
        self.overwrite_window().await;
        self.independent_handles().await;
        self.reopen_sees_writes().await;
    }

    async fn write_then_read(&self) {
        let handle = self.factory.open(&self.name("basic")).unwrap();
        assert_eq!(handle.len().await.unwrap(), 0);

        handle.write(0, b"hello world").await.unwrap();
        assert_eq!(handle.len().await.unwrap(), 11);
        assert_eq!(&handle.read(0, 11).await.unwrap()[..], b"hello world");
        assert_eq!(&handle.read(6, 5).await.unwrap()[..], b"world");
    }

    async fn short_read_at_end(&self) {
        let handle = self.factory.open(&self.name("short")).unwrap();
        handle.write(0, b"abc").await.unwrap();

        assert_eq!(&handle.read(1, 100).await.unwrap()[..], b"bc");
        assert!(handle.read(3, 10).await.unwrap().is_empty());
        assert!(handle.read(50, 10).await.unwrap().is_empty());
    }

    async fn zero_fill_gap(&self) {
        let handle = self.factory.open(&self.name("gap")).unwrap();
        handle.write(4, b"xy").await.unwrap();

        assert_eq!(handle.len().await.unwrap(), 6);
        assert_eq!(&handle.read(0, 6).await.unwrap()[..], b"\0\0\0\0xy");
    }

    async fn overwrite_window(&self) {
        let handle = self.factory.open(&self.name("overwrite")).unwrap();
        handle.write(0, b"aaaaaaaa").await.unwrap();
        handle.write(2, b"ZZ").await.unwrap();

        assert_eq!(&handle.read(0, 8).await.unwrap()[..], b"aaZZaaaa");
        assert_eq!(handle.len().await.unwrap(), 8);
    }

    async fn independent_handles(&self) {
        let a = self.factory.open(&self.name("a")).unwrap();
        let b = self.factory.open(&self.name("b")).unwrap();
        a.write(0, b"first").await.unwrap();
        b.write(0, b"second").await.unwrap();

        assert_eq!(&a.read(0, 5).await.unwrap()[..], b"first");
        assert_eq!(&b.read(0, 6).await.unwrap()[..], b"second");
    }

    async fn reopen_sees_writes(&self) {
        let name = self.name("reopen");
        let first = self.factory.open(&name).unwrap();
        first.write(0, b"persisted").await.unwrap();
        first.sync().await.unwrap();
        drop(first);

        let second = self.factory.open(&name).unwrap();
        assert_eq!(&second.read(0, 9).await.unwrap()[..], b"persisted");
    }
}
