//! Behaviour every log backend must share, run against both backends.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rill_core::{LogOffset, LogPartition, Name, PartitionId};
use rill_log::{FileLogConfig, FileLogManager, LogError, LogManager, MemLogManager};

const SHORT: Duration = Duration::from_millis(20);

fn name(n: &str) -> Name {
    Name::of("test", n).unwrap()
}

fn msg(s: &'static str) -> Bytes {
    Bytes::from_static(s.as_bytes())
}

/// Runs a contract check against a fresh manager of each backend.
macro_rules! contract {
    ($test:ident, $check:ident) => {
        mod $test {
            use super::*;

            #[tokio::test]
            async fn test_memory() {
                let manager = MemLogManager::<Bytes>::in_memory();
                $check(&manager).await;
            }

            #[tokio::test]
            async fn test_file() {
                let dir = tempfile::tempdir().unwrap();
                let manager = FileLogManager::<Bytes>::open(FileLogConfig::new(dir.path()))
                    .await
                    .unwrap();
                $check(&manager).await;
            }
        }
    };
}

async fn create_and_describe(manager: &dyn LogManager<Bytes>) {
    assert!(!manager.exists(&name("log")));
    assert!(manager.create_if_not_exists(&name("log"), 3).await.unwrap());
    assert!(!manager.create_if_not_exists(&name("log"), 7).await.unwrap());
    assert!(manager.exists(&name("log")));
    assert_eq!(manager.size(&name("log")).unwrap(), 3);
    assert_eq!(manager.list_all(), vec![name("log")]);

    assert!(manager.create_if_not_exists(&name("empty"), 0).await.is_err());
    assert!(matches!(
        manager.size(&name("missing")),
        Err(LogError::UnknownLog { .. })
    ));
    assert!(manager.get_appender(&name("missing")).is_err());
}
contract!(create, create_and_describe);

async fn append_assigns_offsets(manager: &dyn LogManager<Bytes>) {
    manager.create_if_not_exists(&name("log"), 2).await.unwrap();
    let appender = manager.get_appender(&name("log")).unwrap();
    assert_eq!(appender.size(), 2);
    assert_eq!(appender.name(), &name("log"));

    for expected in 0..5 {
        let offset = appender.append(PartitionId::new(0), msg("a")).await.unwrap();
        assert_eq!(offset.offset(), expected);
        assert_eq!(offset.partition(), &LogPartition::of(name("log"), 0));
    }
    let other = appender.append(PartitionId::new(1), msg("b")).await.unwrap();
    assert_eq!(other.offset(), 0);

    assert!(matches!(
        appender.append(PartitionId::new(2), msg("c")).await,
        Err(LogError::PartitionOutOfRange { partition: 2, size: 2, .. })
    ));
}
contract!(append, append_assigns_offsets);

async fn read_preserves_partition_order(manager: &dyn LogManager<Bytes>) {
    manager.create_if_not_exists(&name("log"), 2).await.unwrap();
    let appender = manager.get_appender(&name("log")).unwrap();
    for value in ["a0", "a1", "a2"] {
        appender.append(PartitionId::new(0), msg(value)).await.unwrap();
    }
    for value in ["b0", "b1"] {
        appender.append(PartitionId::new(1), msg(value)).await.unwrap();
    }

    let mut tailer = manager.get_tailer(&name("log"), &name("group")).unwrap();
    let mut seen = vec![Vec::new(), Vec::new()];
    while let Some(record) = tailer.read(SHORT).await.unwrap() {
        let partition = record.offset().partition().partition().index();
        seen[partition].push(record.message().clone());
    }
    assert_eq!(seen[0], vec![msg("a0"), msg("a1"), msg("a2")]);
    assert_eq!(seen[1], vec![msg("b0"), msg("b1")]);
}
contract!(read_order, read_preserves_partition_order);

async fn read_times_out_then_wakes(manager: &dyn LogManager<Bytes>) {
    manager.create_if_not_exists(&name("log"), 1).await.unwrap();
    let mut tailer = manager.get_tailer(&name("log"), &name("group")).unwrap();
    assert!(tailer.read(SHORT).await.unwrap().is_none());
    assert!(tailer.read(Duration::ZERO).await.unwrap().is_none());

    let appender = manager.get_appender(&name("log")).unwrap();
    let writer = {
        let appender = Arc::clone(&appender);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            appender.append(PartitionId::new(0), msg("late")).await.unwrap();
        })
    };
    let record = tailer.read(Duration::from_secs(5)).await.unwrap().unwrap();
    assert_eq!(record.message(), &msg("late"));
    writer.await.unwrap();
}
contract!(read_wake, read_times_out_then_wakes);

async fn commit_tracks_lag(manager: &dyn LogManager<Bytes>) {
    manager.create_if_not_exists(&name("log"), 2).await.unwrap();
    let appender = manager.get_appender(&name("log")).unwrap();
    for _ in 0..3 {
        appender.append(PartitionId::new(0), msg("x")).await.unwrap();
    }
    appender.append(PartitionId::new(1), msg("y")).await.unwrap();

    let group = name("group");
    assert_eq!(manager.get_lag(&name("log"), &group).unwrap().lag(), 4);
    assert!(manager.list_consumer_groups(&name("log")).unwrap().is_empty());

    let mut tailer = manager.get_tailer(&name("log"), &group).unwrap();
    let record = tailer.read(SHORT).await.unwrap().unwrap();
    tailer.commit(record.offset()).await.unwrap();

    let lags = manager.get_lag_per_partition(&name("log"), &group).unwrap();
    let total: u64 = lags.iter().map(|lag| lag.lag()).sum();
    assert_eq!(total, 3);
    assert_eq!(manager.list_consumer_groups(&name("log")).unwrap(), vec![group.clone()]);

    while tailer.read(SHORT).await.unwrap().is_some() {}
    tailer.commit_all().await.unwrap();
    let lag = manager.get_lag(&name("log"), &group).unwrap();
    assert_eq!(lag.lag(), 0);
    assert_eq!(lag.upper(), 4);

    // Another group has its own positions.
    assert_eq!(manager.get_lag(&name("log"), &name("other")).unwrap().lag(), 4);
}
contract!(commit, commit_tracks_lag);

async fn tailers_are_exclusive_per_group(manager: &dyn LogManager<Bytes>) {
    manager.create_if_not_exists(&name("log"), 2).await.unwrap();
    let p0 = LogPartition::of(name("log"), 0);
    let p1 = LogPartition::of(name("log"), 1);

    let first = manager.create_tailer(&name("group"), &[p0.clone()]).unwrap();
    assert!(matches!(
        manager.create_tailer(&name("group"), &[p1.clone(), p0.clone()]),
        Err(LogError::TailerAlreadyOpen { .. })
    ));
    let second = manager.create_tailer(&name("group"), &[p1.clone()]).unwrap();
    let other = manager.create_tailer(&name("other"), &[p0.clone(), p1]).unwrap();
    assert_eq!(other.assignments().len(), 2);

    drop(first);
    let mut reopened = manager.create_tailer(&name("group"), &[p0]).unwrap();
    reopened.close();
    assert!(reopened.closed());
    assert!(matches!(reopened.read(SHORT).await, Err(LogError::Closed)));
    drop(second);

    assert!(manager
        .create_tailer(&name("group"), &[LogPartition::of(name("log"), 9)])
        .is_err());
    assert!(manager.create_tailer(&name("group"), &[]).is_err());
}
contract!(exclusive, tailers_are_exclusive_per_group);

async fn tailer_positioning(manager: &dyn LogManager<Bytes>) {
    manager.create_if_not_exists(&name("log"), 1).await.unwrap();
    let appender = manager.get_appender(&name("log")).unwrap();
    for value in ["m0", "m1", "m2", "m3"] {
        appender.append(PartitionId::new(0), msg(value)).await.unwrap();
    }
    let partition = LogPartition::of(name("log"), 0);
    let mut tailer = manager.get_tailer(&name("log"), &name("group")).unwrap();

    let first = tailer.read(SHORT).await.unwrap().unwrap();
    tailer.commit(first.offset()).await.unwrap();
    tailer.read(SHORT).await.unwrap().unwrap();
    tailer.read(SHORT).await.unwrap().unwrap();

    tailer.to_last_committed();
    assert_eq!(tailer.read(SHORT).await.unwrap().unwrap().message(), &msg("m1"));

    tailer.seek(&LogOffset::new(partition.clone(), 3)).unwrap();
    assert_eq!(tailer.read(SHORT).await.unwrap().unwrap().message(), &msg("m3"));

    tailer.to_start();
    assert_eq!(tailer.read(SHORT).await.unwrap().unwrap().message(), &msg("m0"));

    tailer.to_end();
    assert!(tailer.read(SHORT).await.unwrap().is_none());

    let foreign = LogOffset::new(LogPartition::of(name("elsewhere"), 0), 0);
    assert!(matches!(tailer.seek(&foreign), Err(LogError::NotAssigned { .. })));
    assert!(matches!(
        tailer.commit(&foreign).await,
        Err(LogError::NotAssigned { .. })
    ));

    tailer.reset().await.unwrap();
    assert_eq!(manager.get_lag(&name("log"), &name("group")).unwrap().lag(), 4);
    assert_eq!(tailer.read(SHORT).await.unwrap().unwrap().message(), &msg("m0"));
}
contract!(positioning, tailer_positioning);

async fn wait_for_commit(manager: &dyn LogManager<Bytes>) {
    manager.create_if_not_exists(&name("log"), 1).await.unwrap();
    let appender = manager.get_appender(&name("log")).unwrap();
    let offset = appender.append(PartitionId::new(0), msg("x")).await.unwrap();
    let group = name("group");

    assert!(!appender.wait_for(&offset, &group, Duration::ZERO).await.unwrap());
    assert!(!appender.wait_for(&offset, &group, SHORT).await.unwrap());

    let mut tailer = manager.get_tailer(&name("log"), &group).unwrap();
    let committer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let record = tailer.read(Duration::from_secs(1)).await.unwrap().unwrap();
        tailer.commit(record.offset()).await.unwrap();
        tailer
    });
    assert!(appender
        .wait_for(&offset, &group, Duration::from_secs(5))
        .await
        .unwrap());
    committer.await.unwrap();

    assert!(appender.wait_for(&offset, &group, Duration::ZERO).await.unwrap());
    assert!(!appender
        .wait_for(&offset, &name("other"), Duration::ZERO)
        .await
        .unwrap());
}
contract!(wait_for, wait_for_commit);

async fn close_fails_everything(manager: &dyn LogManager<Bytes>) {
    manager.create_if_not_exists(&name("log"), 1).await.unwrap();
    let appender = manager.get_appender(&name("log")).unwrap();
    let offset = appender.append(PartitionId::new(0), msg("x")).await.unwrap();
    let mut tailer = manager.get_tailer(&name("log"), &name("group")).unwrap();

    manager.close();
    assert!(manager.closed());
    assert!(appender.closed());
    assert!(tailer.closed());
    assert!(matches!(
        appender.append(PartitionId::new(0), msg("y")).await,
        Err(LogError::Closed)
    ));
    assert!(matches!(tailer.read(SHORT).await, Err(LogError::Closed)));
    assert!(matches!(tailer.commit(&offset).await, Err(LogError::Closed)));
    assert!(matches!(
        appender.wait_for(&offset, &name("group"), SHORT).await,
        Err(LogError::Closed)
    ));
    assert!(matches!(
        manager.get_appender(&name("log")),
        Err(LogError::Closed)
    ));
}
contract!(close, close_fails_everything);

#[tokio::test]
async fn test_close_wakes_blocked_reader() {
    let manager = Arc::new(MemLogManager::<Bytes>::in_memory());
    manager.create_if_not_exists(&name("log"), 1).await.unwrap();
    let mut tailer = manager.get_tailer(&name("log"), &name("group")).unwrap();

    let reader = tokio::spawn(async move { tailer.read(Duration::from_secs(30)).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.close();

    let result = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .expect("reader was not woken")
        .unwrap();
    assert!(matches!(result, Err(LogError::Closed)));
}
