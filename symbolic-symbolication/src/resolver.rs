//! Loading of symbol tables and resolution of module offsets.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use indexmap::IndexSet;
use symbolic_breakpad::{ParseOptions, SymbolTable, DEFAULT_END_SLACK};
use symbolic_cache::{CacheError, CacheStore};
use symbolic_common::ModuleRef;
use tokio::time::Instant;

use crate::memory::TableCache;
use crate::sources::{FetchError, SymbolSource};

/// Default number of retries after a transient fetch error.
pub const DEFAULT_FETCH_RETRIES: u32 = 2;

/// Default delay before the first retry. Subsequent retries wait linearly longer.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Default number of parsed symbol tables kept in memory.
pub const DEFAULT_MEMORY_CACHE_CAPACITY: usize = 64;

/// Configuration of a [`SymbolResolver`].
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    /// Number of retries after a transient fetch error before giving up on a module.
    pub fetch_retries: u32,
    /// Delay before the first retry.
    pub retry_backoff: Duration,
    /// Number of parsed symbol tables kept in memory across requests.
    pub memory_cache_capacity: usize,
    /// How far past the end of a module offsets still resolve to its last symbol.
    pub end_slack: u64,
    /// Options for parsing symbol files.
    pub parse_options: ParseOptions,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            fetch_retries: DEFAULT_FETCH_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            memory_cache_capacity: DEFAULT_MEMORY_CACHE_CAPACITY,
            end_slack: DEFAULT_END_SLACK,
            parse_options: ParseOptions::default(),
        }
    }
}

/// Where a symbol table was loaded from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModuleOrigin {
    /// The table was already parsed in this process.
    MemoryCache,
    /// The symbol file was read from the disk cache.
    DiskCache,
    /// The symbol file was downloaded from a symbol source.
    Source,
}

/// The outcome of loading the symbol table of a module.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModuleStatus {
    /// The symbol table is available.
    Found {
        /// Where the table was loaded from.
        from: ModuleOrigin,
    },
    /// All sources confirmed that the symbol file does not exist.
    NotFound,
    /// The symbol file exists but could not be parsed.
    Corrupt,
    /// Fetching the symbol file failed, even after retrying.
    FetchFailed,
    /// The request deadline passed before the module was loaded.
    Timeout,
}

impl ModuleStatus {
    /// Returns `true` if the symbol table is available.
    pub fn is_found(self) -> bool {
        matches!(self, ModuleStatus::Found { .. })
    }

    /// A short name of the status, used as a metric dimension in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleStatus::Found {
                from: ModuleOrigin::MemoryCache,
            } => "memory_cache",
            ModuleStatus::Found {
                from: ModuleOrigin::DiskCache,
            } => "disk_cache",
            ModuleStatus::Found {
                from: ModuleOrigin::Source,
            } => "source",
            ModuleStatus::NotFound => "not_found",
            ModuleStatus::Corrupt => "corrupt",
            ModuleStatus::FetchFailed => "fetch_failed",
            ModuleStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolution of a single stack frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResolvedFrame {
    /// The frame does not belong to a module with symbols.
    ///
    /// This covers frames without a module, as well as modules that are missing, corrupt or
    /// could not be loaded.
    Unknown,
    /// The module has symbols, but none covers the offset.
    UnknownOffset {
        /// The module-relative offset of the frame.
        raw_offset: u64,
    },
    /// The offset was resolved to a symbol.
    Resolved {
        /// The name of the function or public symbol.
        name: String,
        /// The distance of the offset from the start of the symbol.
        offset: u64,
        /// The source file, if line information was loaded.
        file: Option<String>,
        /// The line number, if line information was loaded.
        line: Option<u64>,
    },
}

/// The symbol table and status of a loaded module.
#[derive(Clone, Debug)]
pub struct LoadedModule {
    status: ModuleStatus,
    table: Option<Arc<SymbolTable>>,
}

impl LoadedModule {
    fn found(from: ModuleOrigin, table: Arc<SymbolTable>) -> Self {
        LoadedModule {
            status: ModuleStatus::Found { from },
            table: Some(table),
        }
    }

    fn failed(status: ModuleStatus) -> Self {
        LoadedModule {
            status,
            table: None,
        }
    }

    /// The outcome of loading this module.
    pub fn status(&self) -> ModuleStatus {
        self.status
    }

    /// The symbol table, if the module was found.
    pub fn table(&self) -> Option<&SymbolTable> {
        self.table.as_deref()
    }
}

/// The modules loaded for a batch of stack traces.
///
/// Frames are resolved against this set after all modules of the batch have been loaded, so every
/// module is fetched and parsed at most once per batch regardless of how many frames reference it.
#[derive(Clone, Debug, Default)]
pub struct LoadedModules {
    modules: HashMap<ModuleRef, LoadedModule>,
    end_slack: u64,
}

impl LoadedModules {
    /// Returns the loaded module for a reference, if it was part of the batch.
    pub fn get(&self, module: &ModuleRef) -> Option<&LoadedModule> {
        self.modules.get(module)
    }

    /// Returns the status of a module, if it was part of the batch.
    pub fn status(&self, module: &ModuleRef) -> Option<ModuleStatus> {
        self.get(module).map(LoadedModule::status)
    }

    /// Returns the number of distinct modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` if no modules were loaded.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Iterates over all distinct modules and their status.
    pub fn statuses(&self) -> impl Iterator<Item = (&ModuleRef, ModuleStatus)> + '_ {
        self.modules
            .iter()
            .map(|(module, loaded)| (module, loaded.status))
    }

    /// Resolves a frame given by its index into a memory map and a module-relative offset.
    ///
    /// Negative or out-of-range module indexes resolve to [`ResolvedFrame::Unknown`] without
    /// looking at any table, as do modules without symbols. An offset before the first symbol or
    /// too far past the end of the module resolves to [`ResolvedFrame::UnknownOffset`].
    pub fn resolve_frame(
        &self,
        memory_map: &[ModuleRef],
        module_index: i64,
        offset: u64,
    ) -> ResolvedFrame {
        let Some(module) = usize::try_from(module_index)
            .ok()
            .and_then(|index| memory_map.get(index))
        else {
            return ResolvedFrame::Unknown;
        };

        let Some(table) = self.get(module).and_then(LoadedModule::table) else {
            return ResolvedFrame::Unknown;
        };

        match table.lookup_with_slack(offset, self.end_slack) {
            Some(lookup) => ResolvedFrame::Resolved {
                name: lookup.symbol.name.clone(),
                offset: lookup.offset,
                file: lookup.file.map(str::to_owned),
                line: lookup.line,
            },
            None => ResolvedFrame::UnknownOffset { raw_offset: offset },
        }
    }
}

enum DiskLookup {
    Hit(Arc<SymbolTable>),
    Miss,
}

/// Loads symbol tables through a chain of caches and resolves offsets against them.
///
/// Tables are looked up in this order:
///
///  1. An in-process LRU of recently parsed tables.
///  2. The shared [`CacheStore`] on disk, if configured.
///  3. The [`SymbolSource`]. Downloaded files are parsed and then written to the disk cache.
///
/// Disk cache failures never fail a lookup. The resolver falls back to fetching from the source
/// and logs the error instead. Only successfully parsed tables are kept in memory, so a module
/// that is missing now is looked up again on the next request.
#[derive(Debug)]
pub struct SymbolResolver {
    source: Arc<dyn SymbolSource>,
    cache: Option<CacheStore>,
    memory: TableCache,
    config: ResolverConfig,
}

impl SymbolResolver {
    /// Creates a resolver fetching from `source` and caching on disk in `cache`.
    pub fn new<S>(source: S, cache: Option<CacheStore>, config: ResolverConfig) -> Self
    where
        S: SymbolSource + 'static,
    {
        Self::from_arc(Arc::new(source), cache, config)
    }

    /// Creates a resolver from a shared source.
    pub fn from_arc(
        source: Arc<dyn SymbolSource>,
        cache: Option<CacheStore>,
        config: ResolverConfig,
    ) -> Self {
        SymbolResolver {
            source,
            cache,
            memory: TableCache::new(config.memory_cache_capacity),
            config,
        }
    }

    /// The configuration of this resolver.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Returns the number of symbol tables held in memory.
    pub fn memory_cache_len(&self) -> usize {
        self.memory.len()
    }

    /// Drops all symbol tables held in memory.
    pub fn clear_memory_cache(&self) {
        self.memory.clear();
    }

    /// Loads all distinct modules of a batch concurrently.
    ///
    /// Each module load is bounded by `deadline`. Modules that are not loaded in time are marked
    /// with [`ModuleStatus::Timeout`] without affecting the other modules.
    #[tracing::instrument(skip_all, fields(modules = tracing::field::Empty))]
    pub async fn load_modules<'a, I>(&self, modules: I, deadline: Instant) -> LoadedModules
    where
        I: IntoIterator<Item = &'a ModuleRef>,
    {
        let unique: IndexSet<&ModuleRef> = modules.into_iter().collect();
        tracing::Span::current().record("modules", unique.len());

        let loads = unique.into_iter().map(|module| async move {
            let loaded = match tokio::time::timeout_at(deadline, self.load_module(module)).await {
                Ok(loaded) => loaded,
                Err(_) => {
                    tracing::warn!(module = %module, "timed out loading symbols");
                    LoadedModule::failed(ModuleStatus::Timeout)
                }
            };

            tracing::debug!(module = %module, status = %loaded.status, "loaded module");
            (module.clone(), loaded)
        });

        LoadedModules {
            modules: futures::future::join_all(loads).await.into_iter().collect(),
            end_slack: self.config.end_slack,
        }
    }

    /// Loads the symbol table of a single module.
    pub async fn load_module(&self, module: &ModuleRef) -> LoadedModule {
        if let Some(table) = self.memory.get(module) {
            return LoadedModule::found(ModuleOrigin::MemoryCache, table);
        }

        if let DiskLookup::Hit(table) = self.load_from_disk(module).await {
            self.memory.insert(module.clone(), Arc::clone(&table));
            return LoadedModule::found(ModuleOrigin::DiskCache, table);
        }

        let data = match self.fetch_with_retries(module).await {
            Ok(data) => data,
            Err(FetchError::NotFound) => return LoadedModule::failed(ModuleStatus::NotFound),
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn Error,
                    module = %module,
                    source = self.source.name(),
                    "failed to fetch symbol file"
                );
                return LoadedModule::failed(ModuleStatus::FetchFailed);
            }
        };

        match self.parse_and_store(module, data).await {
            Some(table) => {
                self.memory.insert(module.clone(), Arc::clone(&table));
                LoadedModule::found(ModuleOrigin::Source, table)
            }
            None => LoadedModule::failed(ModuleStatus::Corrupt),
        }
    }

    async fn load_from_disk(&self, module: &ModuleRef) -> DiskLookup {
        let Some(store) = self.cache.clone() else {
            return DiskLookup::Miss;
        };

        let options = self.config.parse_options;
        let task_module = module.clone();

        let result = tokio::task::spawn_blocking(move || -> Result<DiskLookup, CacheError> {
            let Some(cached) = store.get(&task_module)? else {
                return Ok(DiskLookup::Miss);
            };

            match SymbolTable::parse_with_options(&cached.data, options) {
                Ok(table) => Ok(DiskLookup::Hit(Arc::new(table))),
                Err(error) => {
                    tracing::warn!(
                        error = &error as &dyn Error,
                        module = %task_module,
                        "invalidating corrupt cache entry"
                    );
                    store.remove_entry(&cached.entry)?;
                    Ok(DiskLookup::Miss)
                }
            }
        })
        .await;

        match result {
            Ok(Ok(lookup)) => lookup,
            Ok(Err(error)) => {
                tracing::error!(
                    error = &error as &dyn Error,
                    module = %module,
                    "failed to read from symbol cache"
                );
                DiskLookup::Miss
            }
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn Error,
                    module = %module,
                    "symbol cache lookup panicked"
                );
                DiskLookup::Miss
            }
        }
    }

    async fn fetch_with_retries(&self, module: &ModuleRef) -> Result<Bytes, FetchError> {
        let mut attempt = 0;
        loop {
            match self.source.fetch(module).await {
                Ok(data) => return Ok(data),
                Err(FetchError::NotFound) => return Err(FetchError::NotFound),
                Err(error) if attempt < self.config.fetch_retries => {
                    attempt += 1;
                    tracing::debug!(
                        error = &error as &dyn Error,
                        module = %module,
                        attempt,
                        "retrying symbol fetch"
                    );
                    tokio::time::sleep(retry_delay(self.config.retry_backoff, attempt)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Parses a downloaded symbol file and writes it to the disk cache if it is valid.
    async fn parse_and_store(&self, module: &ModuleRef, data: Bytes) -> Option<Arc<SymbolTable>> {
        let store = self.cache.clone();
        let options = self.config.parse_options;
        let task_module = module.clone();

        let result = tokio::task::spawn_blocking(move || {
            let table = match SymbolTable::parse_with_options(&data, options) {
                Ok(table) => table,
                Err(error) => {
                    tracing::error!(
                        error = &error as &dyn Error,
                        module = %task_module,
                        "symbol file is corrupt"
                    );
                    return None;
                }
            };

            if let Some(store) = store {
                if let Err(error) = store.put(&task_module, &data) {
                    tracing::error!(
                        error = &error as &dyn Error,
                        module = %task_module,
                        "failed to write to symbol cache"
                    );
                }
            }

            Some(Arc::new(table))
        })
        .await;

        match result {
            Ok(table) => table,
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn Error,
                    module = %module,
                    "parsing symbol file panicked"
                );
                None
            }
        }
    }
}

/// The linear backoff before retry number `attempt`, saturating for huge backoffs.
fn retry_delay(backoff: Duration, attempt: u32) -> Duration {
    backoff.saturating_mul(attempt)
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_retry_delay() {
        let backoff = Duration::from_millis(200);
        assert_eq!(retry_delay(backoff, 1), Duration::from_millis(200));
        assert_eq!(retry_delay(backoff, 2), Duration::from_millis(400));
        assert_eq!(retry_delay(Duration::MAX, 2), Duration::MAX);
    }
}
