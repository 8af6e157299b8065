//! Opening drives over existing storage: restore, and reads through a
//! second drive bound to the same logs.

use peerdrive_fs::{Drive, DriveOptions, DriveStorage};
use peerdrive_store_memory::MemoryStorage;
use tempfile::tempdir;

#[tokio::test]
async fn restore_from_disk() {
    let dir = tempdir().unwrap();

    let (key, version) = {
        let drive = Drive::open(dir.path(), DriveOptions::default())
            .await
            .unwrap();
        drive.write_file("/persisted.txt", "still here").await.unwrap();
        let key = drive.key();
        let version = drive.version().await;
        drive.close().await.unwrap();
        (key, version)
    };

    let restored = Drive::open(dir.path(), DriveOptions::default())
        .await
        .unwrap();
    assert_eq!(restored.key(), key);
    assert_eq!(restored.version().await, version);
    assert!(restored.writable());
    assert_eq!(
        restored.read_file_utf8("/persisted.txt").await.unwrap(),
        "still here"
    );

    // And it can keep writing.
    restored.write_file("/more.txt", "new data").await.unwrap();
    assert_eq!(restored.read_file_utf8("/more.txt").await.unwrap(), "new data");
}

#[tokio::test]
async fn second_drive_on_same_storage_reads_identical_bytes() {
    let storage = MemoryStorage::shared();

    let writer = Drive::open(
        DriveStorage::factory(storage.clone()),
        DriveOptions::default(),
    )
    .await
    .unwrap();
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 241) as u8).collect();
    writer.write_file("/x", payload.clone()).await.unwrap();

    let reader = Drive::open(
        DriveStorage::factory(storage.clone()),
        DriveOptions {
            key: Some(writer.key()),
            secret_key: None,
        },
    )
    .await
    .unwrap();
    let read_back = reader.read_file("/x").await.unwrap();
    assert_eq!(read_back.len(), 200_000);
    assert_eq!(&read_back[..], &payload[..]);
}

#[tokio::test]
async fn restoring_with_the_wrong_key_fails() {
    let dir = tempdir().unwrap();
    let drive = Drive::open(dir.path(), DriveOptions::default())
        .await
        .unwrap();
    let mut wrong = drive.key();
    wrong[0] ^= 0xff;
    drive.close().await.unwrap();

    let result = Drive::open(
        dir.path(),
        DriveOptions {
            key: Some(wrong),
            secret_key: None,
        },
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn key_only_open_on_blank_storage_is_pending_not_failed() {
    let somewhere = Drive::open(
        DriveStorage::factory(MemoryStorage::new()),
        DriveOptions::default(),
    )
    .await
    .unwrap();

    // A replica with only the public key and nothing replicated yet.
    let replica = Drive::open(
        DriveStorage::factory(MemoryStorage::new()),
        DriveOptions {
            key: Some(somewhere.key()),
            secret_key: None,
        },
    )
    .await
    .unwrap();

    assert!(!replica.writable());
    assert_eq!(replica.key(), somewhere.key());
    // Nothing is known yet; the index is empty.
    assert!(replica.readdir("/").await.unwrap().is_empty());
    assert_eq!(replica.version().await, 0);
}

#[tokio::test]
async fn secret_key_restores_a_writable_drive_onto_blank_storage() {
    let original = Drive::open(
        DriveStorage::factory(MemoryStorage::new()),
        DriveOptions::default(),
    )
    .await
    .unwrap();
    original.write_file("/a", "data").await.unwrap();
    let key = original.key();
    let secret = original.secret_key().expect("writable drive holds its secret");

    // Storage that has never seen this feed: only the secret key ties
    // the new drive to the old identity.
    let rebuilt = Drive::open(
        DriveStorage::factory(MemoryStorage::new()),
        DriveOptions {
            key: None,
            secret_key: Some(secret),
        },
    )
    .await
    .unwrap();

    assert_eq!(rebuilt.key(), key);
    assert_eq!(rebuilt.discovery_key(), original.discovery_key());
    assert!(rebuilt.writable());
    // Nothing replicated: this is a fresh writable bootstrap, header only.
    assert_eq!(rebuilt.version().await, 1);

    rebuilt.write_file("/b", "written elsewhere").await.unwrap();
    assert_eq!(
        rebuilt.read_file_utf8("/b").await.unwrap(),
        "written elsewhere"
    );

    // Supplying the matching public key alongside the secret also works.
    let pinned = Drive::open(
        DriveStorage::factory(MemoryStorage::new()),
        DriveOptions {
            key: Some(key),
            secret_key: Some(secret),
        },
    )
    .await
    .unwrap();
    assert!(pinned.writable());
    assert_eq!(pinned.key(), key);
}
