//! Drive replication: a key-only replica converging on a writer over one
//! bidirectional stream carrying both logs.

use peerdrive_fs::{Drive, DriveEvent, DriveOptions, DriveStorage};
use peerdrive_store_memory::MemoryStorage;
use std::{future::Future, time::Duration};

async fn fresh_drive() -> Drive {
    Drive::open(
        DriveStorage::factory(MemoryStorage::new()),
        DriveOptions::default(),
    )
    .await
    .unwrap()
}

async fn replica_of(writer: &Drive) -> Drive {
    Drive::open(
        DriveStorage::factory(MemoryStorage::new()),
        DriveOptions {
            key: Some(writer.key()),
            secret_key: None,
        },
    )
    .await
    .unwrap()
}

/// Polls until the closure reports success or a generous deadline passes.
async fn converge<F, Fut>(mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if probe().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("drives did not converge in time");
}

#[tokio::test]
async fn replica_converges_on_existing_files() {
    let writer = fresh_drive().await;
    writer.write_file("/a.txt", "hello").await.unwrap();
    writer.write_file("/b.txt", "world").await.unwrap();

    let replica = replica_of(&writer).await;

    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let writer_session = tokio::spawn({
        let writer = writer.clone();
        async move { writer.replicate(ours).await }
    });
    let replica_session = tokio::spawn({
        let replica = replica.clone();
        async move { replica.replicate(theirs).await }
    });

    // Both index entries and their content blocks must have arrived.
    converge(|| {
        let replica = replica.clone();
        async move {
            let a = replica.read_file_utf8("/a.txt").await;
            let b = replica.read_file_utf8("/b.txt").await;
            matches!((&a, &b), (Ok(x), Ok(y)) if x == "hello" && y == "world")
        }
    })
    .await;

    assert_eq!(replica.read_file_utf8("/a.txt").await.unwrap(), "hello");
    assert_eq!(replica.read_file_utf8("/b.txt").await.unwrap(), "world");
    assert!(!replica.writable());

    let mut names = replica.readdir("/").await.unwrap();
    names.sort();
    assert_eq!(names, vec!["a.txt", "b.txt"]);

    writer_session.abort();
    replica_session.abort();
}

#[tokio::test]
async fn replica_sees_live_writes() {
    let writer = fresh_drive().await;
    let replica = replica_of(&writer).await;

    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let writer_session = tokio::spawn({
        let writer = writer.clone();
        async move { writer.replicate(ours).await }
    });
    let replica_session = tokio::spawn({
        let replica = replica.clone();
        async move { replica.replicate(theirs).await }
    });

    // Written only after both sessions are running.
    writer.write_file("/late.txt", "arrived").await.unwrap();

    converge(|| {
        let replica = replica.clone();
        async move {
            matches!(replica.read_file_utf8("/late.txt").await, Ok(text) if text == "arrived")
        }
    })
    .await;
    assert_eq!(replica.read_file_utf8("/late.txt").await.unwrap(), "arrived");

    writer_session.abort();
    replica_session.abort();
}

#[tokio::test]
async fn replica_emits_content_and_update_events() {
    let writer = fresh_drive().await;
    writer.write_file("/a.txt", "x").await.unwrap();

    let replica = replica_of(&writer).await;
    let mut events = replica.subscribe();

    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let writer_session = tokio::spawn({
        let writer = writer.clone();
        async move { writer.replicate(ours).await }
    });
    let replica_session = tokio::spawn({
        let replica = replica.clone();
        async move { replica.replicate(theirs).await }
    });

    let mut saw_content = false;
    let mut saw_update = false;
    tokio::time::timeout(Duration::from_secs(10), async {
        while !(saw_content && saw_update) {
            match events.recv().await.unwrap() {
                DriveEvent::Content => saw_content = true,
                DriveEvent::Update { .. } => saw_update = true,
                _ => {}
            }
        }
    })
    .await
    .expect("expected content and update events on the replica");

    writer_session.abort();
    replica_session.abort();
}

#[tokio::test]
async fn replicated_large_file_round_trips() {
    let writer = fresh_drive().await;
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 233) as u8).collect();
    writer.write_file("/big", payload.clone()).await.unwrap();

    let replica = replica_of(&writer).await;

    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let writer_session = tokio::spawn({
        let writer = writer.clone();
        async move { writer.replicate(ours).await }
    });
    let replica_session = tokio::spawn({
        let replica = replica.clone();
        async move { replica.replicate(theirs).await }
    });

    converge(|| {
        let replica = replica.clone();
        let payload_len = payload.len();
        async move {
            match replica.read_file("/big").await {
                Ok(bytes) => bytes.len() == payload_len,
                Err(_) => false,
            }
        }
    })
    .await;
    assert_eq!(&replica.read_file("/big").await.unwrap()[..], &payload[..]);

    writer_session.abort();
    replica_session.abort();
}

#[tokio::test]
async fn checkout_works_on_a_replica() {
    let writer = fresh_drive().await;
    writer.write_file("/keep", "v1").await.unwrap();

    let replica = replica_of(&writer).await;

    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let writer_session = tokio::spawn({
        let writer = writer.clone();
        async move { writer.replicate(ours).await }
    });
    let replica_session = tokio::spawn({
        let replica = replica.clone();
        async move { replica.replicate(theirs).await }
    });

    converge(|| {
        let replica = replica.clone();
        async move { matches!(replica.read_file_utf8("/keep").await, Ok(text) if text == "v1") }
    })
    .await;
    let version = replica.version().await;

    writer.unlink("/keep").await.unwrap();
    converge(|| {
        let replica = replica.clone();
        async move { !replica.exists("/keep").await.unwrap_or(true) }
    })
    .await;

    let past = replica.checkout(version).await.unwrap();
    assert_eq!(past.read_file_utf8("/keep").await.unwrap(), "v1");

    writer_session.abort();
    replica_session.abort();
}
