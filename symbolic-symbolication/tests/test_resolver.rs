use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use symbolic_cache::CacheStore;
use symbolic_common::ModuleRef;
use symbolic_symbolication::{
    FetchError, FilesystemSource, ModuleOrigin, ModuleStatus, ResolvedFrame, ResolverConfig,
    SourceSet, SymbolResolver, SymbolSource,
};
use symbolic_testutils::{read_fixture, symbol_store};
use tokio::time::Instant;

use similar_asserts::assert_eq;

type Error = Box<dyn std::error::Error>;

fn xul() -> ModuleRef {
    ModuleRef::new("xul.pdb", "44E4EC8C2F41492B9369D6B9A059577C2").unwrap()
}

fn libc() -> ModuleRef {
    ModuleRef::new("libc.so.6", "0C9B6E7B8D1F3E2A4F2B6D5C3A1E9F870").unwrap()
}

fn missing() -> ModuleRef {
    ModuleRef::new("missing.pdb", "00000000000000000000000000000000").unwrap()
}

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(30)
}

fn config() -> ResolverConfig {
    ResolverConfig {
        retry_backoff: Duration::ZERO,
        ..Default::default()
    }
}

/// A symbol source serving files from memory, optionally failing or stalling.
#[derive(Debug, Default)]
struct MockSource {
    files: HashMap<ModuleRef, Bytes>,
    transient_failures: AtomicUsize,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockSource {
    fn with_file(mut self, module: ModuleRef, data: impl Into<Bytes>) -> Self {
        self.files.insert(module, data.into());
        self
    }

    fn failing(self, failures: usize) -> Self {
        self.transient_failures.store(failures, Ordering::SeqCst);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SymbolSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, module: &ModuleRef) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(FetchError::transient("connection reset"));
        }

        self.files.get(module).cloned().ok_or(FetchError::NotFound)
    }
}

#[tokio::test]
async fn test_load_from_filesystem_source() {
    let source = FilesystemSource::new(symbol_store());
    let resolver = SymbolResolver::new(source, None, config());

    let loaded = resolver.load_module(&xul()).await;
    assert_eq!(
        loaded.status(),
        ModuleStatus::Found {
            from: ModuleOrigin::Source
        }
    );
    assert_eq!(loaded.table().unwrap().len(), 5);

    let loaded = resolver.load_module(&xul()).await;
    assert_eq!(
        loaded.status(),
        ModuleStatus::Found {
            from: ModuleOrigin::MemoryCache
        }
    );
}

#[tokio::test]
async fn test_load_through_disk_cache() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let cache = CacheStore::open(dir.path())?;
    let source = Arc::new(MockSource::default().with_file(xul(), read_fixture("windows/xul.sym")));
    let resolver = SymbolResolver::from_arc(source.clone(), Some(cache.clone()), config());

    let loaded = resolver.load_module(&xul()).await;
    assert_eq!(
        loaded.status(),
        ModuleStatus::Found {
            from: ModuleOrigin::Source
        }
    );
    assert_eq!(
        cache.get(&xul())?.map(|c| c.data),
        Some(read_fixture("windows/xul.sym"))
    );

    resolver.clear_memory_cache();
    let loaded = resolver.load_module(&xul()).await;
    assert_eq!(
        loaded.status(),
        ModuleStatus::Found {
            from: ModuleOrigin::DiskCache
        }
    );
    assert_eq!(source.calls(), 1);

    Ok(())
}

#[tokio::test]
async fn test_not_found_is_not_cached() {
    let source = Arc::new(MockSource::default());
    let resolver = SymbolResolver::from_arc(source.clone(), None, config());

    assert_eq!(resolver.load_module(&missing()).await.status(), ModuleStatus::NotFound);
    assert_eq!(resolver.load_module(&missing()).await.status(), ModuleStatus::NotFound);

    // Missing modules are not retried, but looked up again on the next request.
    assert_eq!(source.calls(), 2);
    assert_eq!(resolver.memory_cache_len(), 0);
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let source = Arc::new(
        MockSource::default()
            .with_file(xul(), read_fixture("windows/xul.sym"))
            .failing(2),
    );
    let resolver = SymbolResolver::from_arc(source.clone(), None, config());

    let loaded = resolver.load_module(&xul()).await;
    assert!(loaded.status().is_found());
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let source = Arc::new(
        MockSource::default()
            .with_file(xul(), read_fixture("windows/xul.sym"))
            .failing(10),
    );
    let resolver = SymbolResolver::from_arc(source.clone(), None, config());

    let loaded = resolver.load_module(&xul()).await;
    assert_eq!(loaded.status(), ModuleStatus::FetchFailed);
    assert!(loaded.table().is_none());
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn test_corrupt_symbol_file() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let cache = CacheStore::open(dir.path())?;
    let source = MockSource::default().with_file(xul(), read_fixture("corrupt/no-header.sym"));
    let resolver = SymbolResolver::new(source, Some(cache.clone()), config());

    assert_eq!(resolver.load_module(&xul()).await.status(), ModuleStatus::Corrupt);
    assert!(cache.get(&xul())?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_corrupt_cache_entry_is_replaced() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let cache = CacheStore::open(dir.path())?;
    cache.put(&xul(), b"garbage")?;

    let source = MockSource::default().with_file(xul(), read_fixture("windows/xul.sym"));
    let resolver = SymbolResolver::new(source, Some(cache.clone()), config());

    let loaded = resolver.load_module(&xul()).await;
    assert_eq!(
        loaded.status(),
        ModuleStatus::Found {
            from: ModuleOrigin::Source
        }
    );
    assert_eq!(
        cache.get(&xul())?.map(|c| c.data),
        Some(read_fixture("windows/xul.sym"))
    );

    Ok(())
}

#[tokio::test]
async fn test_unusable_cache_falls_back_to_source() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("cache");
    let cache = CacheStore::open(&root)?;

    // A file in place of the cache root makes every cache operation fail.
    std::fs::remove_dir_all(&root)?;
    std::fs::write(&root, b"not a directory")?;

    let source = FilesystemSource::new(symbol_store());
    let resolver = SymbolResolver::new(source, Some(cache), config());

    let loaded = resolver.load_module(&libc()).await;
    assert_eq!(
        loaded.status(),
        ModuleStatus::Found {
            from: ModuleOrigin::Source
        }
    );

    Ok(())
}

#[tokio::test]
async fn test_load_modules_deduplicates() {
    let source = Arc::new(
        MockSource::default()
            .with_file(xul(), read_fixture("windows/xul.sym"))
            .with_file(libc(), read_fixture("linux/libc.sym")),
    );
    let resolver = SymbolResolver::from_arc(source.clone(), None, config());

    let memory_map = [xul(), libc(), xul(), missing(), libc()];
    let loaded = resolver.load_modules(&memory_map, deadline()).await;

    assert_eq!(loaded.len(), 3);
    assert_eq!(source.calls(), 3);
    assert!(loaded.status(&xul()).unwrap().is_found());
    assert!(loaded.status(&libc()).unwrap().is_found());
    assert_eq!(loaded.status(&missing()), Some(ModuleStatus::NotFound));
}

#[tokio::test]
async fn test_slow_module_times_out() {
    let slow = MockSource {
        delay: Duration::from_secs(10),
        ..Default::default()
    };
    let sources = SourceSet::new()
        .with(FilesystemSource::new(symbol_store()))
        .with(slow);
    let resolver = SymbolResolver::new(sources, None, config());

    let memory_map = [xul(), missing()];
    let deadline = Instant::now() + Duration::from_millis(500);
    let loaded = resolver.load_modules(&memory_map, deadline).await;

    assert!(Instant::now() < deadline + Duration::from_secs(2));
    assert!(loaded.status(&xul()).unwrap().is_found());
    assert_eq!(loaded.status(&missing()), Some(ModuleStatus::Timeout));

    assert_eq!(loaded.resolve_frame(&memory_map, 1, 0x1000), ResolvedFrame::Unknown);
    assert!(matches!(
        loaded.resolve_frame(&memory_map, 0, 0x1000),
        ResolvedFrame::Resolved { .. }
    ));
}

#[tokio::test]
async fn test_resolve_frame() {
    let source = FilesystemSource::new(symbol_store());
    let resolver = SymbolResolver::new(source, None, config());

    let memory_map = [xul(), missing()];
    let loaded = resolver.load_modules(&memory_map, deadline()).await;

    assert_eq!(
        loaded.resolve_frame(&memory_map, 0, 0x1000),
        ResolvedFrame::Resolved {
            name: "XREMain::XRE_mainRun()".into(),
            offset: 0,
            file: None,
            line: None,
        }
    );
    assert_eq!(
        loaded.resolve_frame(&memory_map, 0, 0x3150),
        ResolvedFrame::Resolved {
            name: "MozStackWalkThread".into(),
            offset: 0x50,
            file: None,
            line: None,
        }
    );

    // Below the first symbol and far beyond the end of the module.
    assert_eq!(
        loaded.resolve_frame(&memory_map, 0, 0x500),
        ResolvedFrame::UnknownOffset { raw_offset: 0x500 }
    );
    assert_eq!(
        loaded.resolve_frame(&memory_map, 0, 0x100000),
        ResolvedFrame::UnknownOffset {
            raw_offset: 0x100000
        }
    );

    assert_eq!(loaded.resolve_frame(&memory_map, 1, 0x1000), ResolvedFrame::Unknown);
    assert_eq!(loaded.resolve_frame(&memory_map, -1, 0x1000), ResolvedFrame::Unknown);
    assert_eq!(loaded.resolve_frame(&memory_map, 2, 0x1000), ResolvedFrame::Unknown);
}

#[tokio::test]
async fn test_resolve_with_lines() {
    let source = FilesystemSource::new(symbol_store());
    let mut config = config();
    config.parse_options.with_lines = true;
    let resolver = SymbolResolver::new(source, None, config);

    let memory_map = [xul()];
    let loaded = resolver.load_modules(&memory_map, deadline()).await;

    assert_eq!(
        loaded.resolve_frame(&memory_map, 0, 0x2015),
        ResolvedFrame::Resolved {
            name: "nsThread::ProcessNextEvent(bool, bool*)".into(),
            offset: 0x15,
            file: Some("hg:hg.mozilla.org/mozilla-central:xpcom/threads/nsThread.cpp:7f4b2bc8b7d1".into()),
            line: Some(1161),
        }
    );
}
