//! Durability of the file backend across reopen.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use rill_core::{Name, PartitionId};
use rill_log::record::encode_frame;
use rill_log::{FileLogConfig, FileLogManager, LogError, LogManager};

fn name(n: &str) -> Name {
    Name::of("test", n).unwrap()
}

async fn open(dir: &tempfile::TempDir) -> FileLogManager<Bytes> {
    FileLogManager::open(FileLogConfig::new(dir.path()).with_fsync(true))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_records_and_commits_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let group = name("group");
    {
        let manager = open(&dir).await;
        manager.create_if_not_exists(&name("log"), 2).await.unwrap();
        let appender = manager.get_appender(&name("log")).unwrap();
        for i in 0..4u32 {
            appender
                .append(PartitionId::new(i % 2), Bytes::from(format!("m{i}")))
                .await
                .unwrap();
        }
        let mut tailer = manager.get_tailer(&name("log"), &group).unwrap();
        let record = tailer.read(Duration::ZERO).await.unwrap().unwrap();
        tailer.commit(record.offset()).await.unwrap();
        manager.close();
    }

    let manager = open(&dir).await;
    assert_eq!(manager.list_all(), vec![name("log")]);
    assert_eq!(manager.size(&name("log")).unwrap(), 2);
    assert_eq!(manager.list_consumer_groups(&name("log")).unwrap(), vec![group.clone()]);
    assert_eq!(manager.get_lag(&name("log"), &group).unwrap().lag(), 3);

    let mut tailer = manager.get_tailer(&name("log"), &group).unwrap();
    let mut remaining = Vec::new();
    while let Some(record) = tailer.read(Duration::from_millis(10)).await.unwrap() {
        remaining.push(record.message().clone());
    }
    remaining.sort();
    assert_eq!(
        remaining,
        vec![Bytes::from("m1"), Bytes::from("m2"), Bytes::from("m3")]
    );

    // New appends continue after the recovered offsets.
    let appender = manager.get_appender(&name("log")).unwrap();
    let offset = appender
        .append(PartitionId::new(0), Bytes::from("m4"))
        .await
        .unwrap();
    assert_eq!(offset.offset(), 2);
}

#[tokio::test]
async fn test_torn_tail_is_dropped_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let manager = open(&dir).await;
        manager.create_if_not_exists(&name("log"), 1).await.unwrap();
        let appender = manager.get_appender(&name("log")).unwrap();
        appender
            .append(PartitionId::new(0), Bytes::from("kept"))
            .await
            .unwrap();
    }

    let path = dir.path().join("test/log/partition-00000.log");
    let mut data = tokio::fs::read(&path).await.unwrap();
    let mut torn = BytesMut::new();
    encode_frame(b"never fully written", &mut torn).unwrap();
    data.extend_from_slice(&torn[..torn.len() - 4]);
    tokio::fs::write(&path, &data).await.unwrap();

    let manager = open(&dir).await;
    let mut tailer = manager.get_tailer(&name("log"), &name("group")).unwrap();
    let record = tailer.read(Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(record.message(), &Bytes::from("kept"));
    assert!(tailer.read(Duration::ZERO).await.unwrap().is_none());

    let appender = manager.get_appender(&name("log")).unwrap();
    let offset = appender
        .append(PartitionId::new(0), Bytes::from("next"))
        .await
        .unwrap();
    assert_eq!(offset.offset(), 1);
}

#[tokio::test]
async fn test_undecodable_record_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    {
        let manager = open(&dir).await;
        manager.create_if_not_exists(&name("log"), 1).await.unwrap();
    }

    // A valid frame whose payload is not an encoded `Bytes`.
    let mut frame = BytesMut::new();
    let mut payload = BytesMut::new();
    payload.put_u32_le(100);
    encode_frame(&payload, &mut frame).unwrap();
    let path = dir.path().join("test/log/partition-00000.log");
    tokio::fs::write(&path, &frame).await.unwrap();

    let result = FileLogManager::<Bytes>::open(FileLogConfig::new(dir.path())).await;
    assert!(matches!(result, Err(LogError::Corruption { .. })));
}

#[tokio::test]
async fn test_partition_record_limit() {
    let dir = tempfile::tempdir().unwrap();
    let config = FileLogConfig::new(dir.path()).with_max_records_per_partition(2);
    let manager = FileLogManager::<Bytes>::open(config).await.unwrap();
    manager.create_if_not_exists(&name("log"), 1).await.unwrap();
    let appender = manager.get_appender(&name("log")).unwrap();

    appender.append(PartitionId::new(0), Bytes::new()).await.unwrap();
    appender.append(PartitionId::new(0), Bytes::new()).await.unwrap();
    assert!(matches!(
        appender.append(PartitionId::new(0), Bytes::new()).await,
        Err(LogError::PartitionFull { max: 2, .. })
    ));
}

#[tokio::test]
async fn test_commits_are_compacted_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let group = name("group");
    {
        let manager = open(&dir).await;
        manager.create_if_not_exists(&name("log"), 1).await.unwrap();
        let appender = manager.get_appender(&name("log")).unwrap();
        for _ in 0..10 {
            appender.append(PartitionId::new(0), Bytes::new()).await.unwrap();
        }
        let mut tailer = manager.get_tailer(&name("log"), &group).unwrap();
        while let Some(record) = tailer.read(Duration::ZERO).await.unwrap() {
            tailer.commit(record.offset()).await.unwrap();
        }
    }

    let path = dir.path().join("test/log/commits.log");
    let before = tokio::fs::metadata(&path).await.unwrap().len();
    let manager = open(&dir).await;
    let after = tokio::fs::metadata(&path).await.unwrap().len();
    assert_eq!(after * 10, before);
    assert_eq!(manager.get_lag(&name("log"), &group).unwrap().lag(), 0);
}

#[tokio::test]
async fn test_concurrent_creates_match_disk() {
    let dir = tempfile::tempdir().unwrap();
    let size = {
        let manager = open(&dir).await;
        let log_name = name("log");
        let (a, b) = tokio::join!(
            manager.create_if_not_exists(&log_name, 2),
            manager.create_if_not_exists(&log_name, 3)
        );
        assert!(a.unwrap() != b.unwrap());
        let size = manager.size(&name("log")).unwrap();
        manager.close();
        size
    };

    let manager = open(&dir).await;
    assert_eq!(manager.size(&name("log")).unwrap(), size);
}
