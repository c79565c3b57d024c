use std::fs::File;
use std::time::{Duration, SystemTime};

use symbolic_cache::{CacheStore, CycleEvent, EvictionConfig, EvictionError, EvictionManager};
use symbolic_common::ModuleRef;
use tokio::sync::{mpsc, oneshot};

use similar_asserts::assert_eq;

type Error = Box<dyn std::error::Error>;

const ENTRY_SIZE: usize = 10 * 1024;

fn module(index: usize) -> ModuleRef {
    ModuleRef::new(format!("lib{index:02}.so"), "0C9B6E7B8D1F3E2A4F2B6D5C3A1E9F870").unwrap()
}

/// Fills the store with `count` entries, where entry 0 is the least recently used.
fn fill(store: &CacheStore, count: usize) -> Result<(), Error> {
    let base = SystemTime::now() - Duration::from_secs(24 * 3600);
    for index in 0..count {
        let entry = store.put(&module(index), &vec![index as u8; ENTRY_SIZE])?;
        let mtime = base + Duration::from_secs(60 * index as u64);
        File::options()
            .write(true)
            .open(entry.path())?
            .set_modified(mtime)?;
    }
    Ok(())
}

#[test]
fn test_evicts_least_recently_used() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let store = CacheStore::open(dir.path())?;
    fill(&store, 15)?;

    let config = EvictionConfig::new(100 * 1024, 90 * 1024)?;
    let manager = EvictionManager::new(store.clone(), config);

    let report = manager.run_cycle()?;
    assert_eq!(report.scanned, 15);
    assert_eq!(report.total_before, 150 * 1024);
    assert_eq!(report.evicted, 6);
    assert_eq!(report.evicted_bytes, 60 * 1024);
    assert_eq!(report.total_after, 90 * 1024);
    assert_eq!(report.failed, 0);

    assert!(store.size_bytes()? <= 90 * 1024);
    for index in 0..6 {
        assert!(store.get(&module(index))?.is_none(), "lib{index:02} not evicted");
    }
    for index in 6..15 {
        assert!(store.get(&module(index))?.is_some(), "lib{index:02} evicted");
    }

    Ok(())
}

#[test]
fn test_eviction_leaves_no_empty_directories() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let store = CacheStore::open(dir.path())?;
    fill(&store, 20)?;

    let config = EvictionConfig::new(40 * 1024, 20 * 1024)?;
    let report = EvictionManager::new(store.clone(), config).run_cycle()?;
    assert_eq!(report.evicted, 18);

    let mut dirs: Vec<_> = std::fs::read_dir(dir.path())?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()?;
    dirs.sort();
    assert_eq!(dirs, vec![".tmp", "lib18.so", "lib19.so"]);

    Ok(())
}

#[test]
fn test_within_budget_is_untouched() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let store = CacheStore::open(dir.path())?;
    fill(&store, 5)?;

    // Above the low watermark but not above the maximum size.
    let config = EvictionConfig::new(50 * 1024, 10 * 1024)?;
    let report = EvictionManager::new(store.clone(), config).run_cycle()?;

    assert_eq!(report.evicted, 0);
    assert_eq!(report.total_after, 50 * 1024);
    assert_eq!(store.list_entries()?.len(), 5);

    Ok(())
}

#[test]
fn test_recently_read_entry_survives() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let store = CacheStore::open(dir.path())?;
    fill(&store, 15)?;

    // Reading the oldest entry makes it the most recently used one.
    store.get(&module(0))?.unwrap();

    let config = EvictionConfig::new(100 * 1024, 90 * 1024)?;
    EvictionManager::new(store.clone(), config).run_cycle()?;

    assert!(store.get(&module(0))?.is_some());
    for index in 1..7 {
        assert!(store.get(&module(index))?.is_none());
    }

    Ok(())
}

#[test]
fn test_invalid_config() {
    assert!(EvictionConfig::new(100, 100).is_err());
    assert!(EvictionConfig::new(100, 200).is_err());
    assert!(EvictionConfig::with_max_size(0).is_err());

    let config = EvictionConfig::with_max_size(100 * 1024).unwrap();
    assert_eq!(config.max_size(), 100 * 1024);
    assert_eq!(config.low_watermark(), 90 * 1024);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_until_shutdown() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let store = CacheStore::open(dir.path())?;
    fill(&store, 15)?;

    let config = EvictionConfig::new(100 * 1024, 90 * 1024)?.interval(Duration::from_millis(20))?;
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let manager = EvictionManager::new(store.clone(), config).with_reporter(events_tx);
    let handle = tokio::spawn(manager.run_until(async {
        shutdown_rx.await.ok();
    }));

    match events_rx.recv().await {
        Some(CycleEvent::Completed(report)) => assert_eq!(report.evicted, 6),
        other => panic!("unexpected event: {other:?}"),
    }

    shutdown_tx.send(()).ok();
    tokio::time::timeout(Duration::from_secs(5), handle).await??;
    assert!(store.size_bytes()? <= 90 * 1024);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_cycles_do_not_stop_the_loop() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("cache");
    let store = CacheStore::open(&root)?;
    std::fs::remove_dir_all(&root)?;

    let config = EvictionConfig::new(1024, 512)?
        .interval(Duration::from_millis(10))?
        .error_backoff(Duration::from_millis(10));
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let manager = EvictionManager::new(store.clone(), config).with_reporter(events_tx);
    let handle = tokio::spawn(manager.run_until(async {
        shutdown_rx.await.ok();
    }));

    for _ in 0..3 {
        match events_rx.recv().await {
            Some(CycleEvent::Failed(EvictionError::Scan(_))) => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(!handle.is_finished());

    // Once the directory reappears, cycles succeed again.
    std::fs::create_dir_all(&root)?;
    loop {
        match events_rx.recv().await {
            Some(CycleEvent::Completed(report)) => {
                assert_eq!(report.scanned, 0);
                break;
            }
            Some(CycleEvent::Failed(_)) => continue,
            None => panic!("eviction loop stopped"),
        }
    }

    shutdown_tx.send(()).ok();
    tokio::time::timeout(Duration::from_secs(5), handle).await??;

    Ok(())
}
