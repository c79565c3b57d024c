//! Background eviction keeping the [`CacheStore`] within its size budget.

use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::error::{ConfigError, EvictionError};
use crate::store::{CacheEntry, CacheStore};

/// Default time between two eviction cycles.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Default pause after a failed eviction cycle.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(10);

/// Default age after which abandoned temporary files are removed.
pub const DEFAULT_TEMP_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Size budget and timing of the [`EvictionManager`].
///
/// Eviction starts once the cache exceeds `max_size` and then removes entries until the cache is
/// at or below `low_watermark`. The band between both values prevents small writes from
/// triggering another eviction right away.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EvictionConfig {
    max_size: u64,
    low_watermark: u64,
    interval: Duration,
    error_backoff: Duration,
    temp_max_age: Duration,
}

impl EvictionConfig {
    /// Creates a configuration with explicit watermarks.
    ///
    /// The low watermark must be strictly below the maximum size.
    pub fn new(max_size: u64, low_watermark: u64) -> Result<Self, ConfigError> {
        if low_watermark >= max_size {
            return Err(ConfigError::Watermarks {
                max_size,
                low_watermark,
            });
        }

        Ok(EvictionConfig {
            max_size,
            low_watermark,
            interval: DEFAULT_SCAN_INTERVAL,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            temp_max_age: DEFAULT_TEMP_MAX_AGE,
        })
    }

    /// Creates a configuration that evicts down to 90% of `max_size`.
    pub fn with_max_size(max_size: u64) -> Result<Self, ConfigError> {
        Self::new(max_size, max_size / 10 * 9)
    }

    /// Sets the time between two cycles.
    ///
    /// The interval must not be zero.
    pub fn interval(mut self, interval: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }

        self.interval = interval;
        Ok(self)
    }

    /// Sets the pause after a failed cycle.
    pub fn error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Sets the age after which temporary files are considered abandoned.
    pub fn temp_max_age(mut self, max_age: Duration) -> Self {
        self.temp_max_age = max_age;
        self
    }

    /// The size above which eviction starts.
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// The size eviction reduces the cache to.
    pub fn low_watermark(&self) -> u64 {
        self.low_watermark
    }
}

/// Statistics of a completed eviction cycle.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CycleReport {
    /// Number of cache entries found.
    pub scanned: usize,
    /// Total size of all entries before eviction.
    pub total_before: u64,
    /// Total size of all entries after eviction.
    pub total_after: u64,
    /// Number of removed entries.
    pub evicted: usize,
    /// Bytes freed by removed entries.
    pub evicted_bytes: u64,
    /// Number of entries that could not be removed.
    pub failed: usize,
    /// Number of abandoned temporary files removed.
    pub temp_removed: usize,
    /// Wall time of the cycle.
    pub duration: Duration,
}

/// Outcome of one iteration of [`EvictionManager::run_until`].
#[derive(Debug)]
pub enum CycleEvent {
    /// The cycle completed.
    Completed(CycleReport),
    /// The cycle failed and the manager is backing off.
    Failed(EvictionError),
}

/// Enforces the size budget of a [`CacheStore`] by removing least-recently-used entries.
///
/// The manager is meant to run as a single long-lived task next to any number of processes
/// reading and writing the store. It relies on the store's atomic renames: files still being
/// written are not visible under their final name and are never evicted.
#[derive(Debug)]
pub struct EvictionManager {
    store: CacheStore,
    config: EvictionConfig,
    reporter: Option<mpsc::UnboundedSender<CycleEvent>>,
}

impl EvictionManager {
    /// Creates a manager for the given store.
    pub fn new(store: CacheStore, config: EvictionConfig) -> Self {
        EvictionManager {
            store,
            config,
            reporter: None,
        }
    }

    /// Sends the outcome of every cycle to the given channel.
    pub fn with_reporter(mut self, reporter: mpsc::UnboundedSender<CycleEvent>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// The configuration of this manager.
    pub fn config(&self) -> &EvictionConfig {
        &self.config
    }

    /// Runs a single eviction cycle.
    ///
    /// If the cache exceeds the maximum size, entries are removed in order of their last access,
    /// oldest first, until the total size is at or below the low watermark. Entries that cannot be
    /// removed are skipped and counted in [`CycleReport::failed`].
    ///
    /// This performs blocking file system I/O.
    #[tracing::instrument(skip(self), fields(root = %self.store.root().display()))]
    pub fn run_cycle(&self) -> Result<CycleReport, EvictionError> {
        let start = Instant::now();

        let temp_removed = match self.store.clear_temp(self.config.temp_max_age) {
            Ok(removed) => removed,
            Err(error) => {
                tracing::warn!(error = &error as &dyn Error, "failed to clear temporary files");
                0
            }
        };

        let mut entries = self.store.list_entries()?;
        let total_before: u64 = entries.iter().map(CacheEntry::size).sum();

        let mut report = CycleReport {
            scanned: entries.len(),
            total_before,
            total_after: total_before,
            temp_removed,
            ..Default::default()
        };

        if total_before > self.config.max_size {
            // Ties are broken by path so that repeated cycles behave the same.
            entries.sort_by(|a, b| {
                a.last_access()
                    .cmp(&b.last_access())
                    .then_with(|| a.path().cmp(b.path()))
            });

            for entry in &entries {
                if report.total_after <= self.config.low_watermark {
                    break;
                }

                match self.store.remove_entry(entry) {
                    Ok(removed) => {
                        report.total_after -= entry.size();
                        if removed {
                            report.evicted += 1;
                            report.evicted_bytes += entry.size();
                            tracing::debug!(module = %entry.module(), size = entry.size(), "evicted cache entry");
                        }
                    }
                    Err(error) => {
                        report.failed += 1;
                        tracing::warn!(
                            error = &error as &dyn Error,
                            module = %entry.module(),
                            "failed to evict cache entry"
                        );
                    }
                }
            }
        }

        report.duration = start.elapsed();
        Ok(report)
    }

    /// Runs eviction cycles at the configured interval until `shutdown` resolves.
    ///
    /// Cycles execute on the blocking thread pool. A failing or panicking cycle is reported and
    /// followed by the configured backoff; it never stops the loop, since a stopped eviction
    /// manager lets the cache grow without bound.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let manager = Arc::new(self);
        tokio::pin!(shutdown);

        let mut interval = tokio::time::interval(manager.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            max_size = manager.config.max_size,
            low_watermark = manager.config.low_watermark,
            interval = ?manager.config.interval,
            "starting cache eviction"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {}
            }

            let cycle_manager = Arc::clone(&manager);
            let result = tokio::task::spawn_blocking(move || cycle_manager.run_cycle())
                .await
                .unwrap_or_else(|e| Err(EvictionError::Crashed(e)));

            match result {
                Ok(report) => {
                    tracing::info!(
                        scanned = report.scanned,
                        total_before = report.total_before,
                        total_after = report.total_after,
                        evicted = report.evicted,
                        evicted_bytes = report.evicted_bytes,
                        failed = report.failed,
                        duration_ms = report.duration.as_millis() as u64,
                        "cache eviction cycle completed"
                    );
                    manager.report(CycleEvent::Completed(report));
                }
                Err(error) => {
                    tracing::error!(error = &error as &dyn Error, "cache eviction cycle failed");
                    manager.report(CycleEvent::Failed(error));

                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(manager.config.error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!("stopped cache eviction");
    }

    fn report(&self, event: CycleEvent) {
        if let Some(ref reporter) = self.reporter {
            // The receiver going away must not affect eviction.
            reporter.send(event).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_config_watermarks() {
        let config = EvictionConfig::with_max_size(1000).unwrap();
        assert_eq!(config.low_watermark(), 900);

        let error = EvictionConfig::new(100, 100).unwrap_err();
        assert_eq!(
            error.to_string(),
            "low watermark (100 bytes) must be below the maximum cache size (100 bytes)"
        );

        assert!(EvictionConfig::with_max_size(0).is_err());
        assert_eq!(EvictionConfig::with_max_size(5).unwrap().low_watermark(), 0);
    }

    #[test]
    fn test_config_zero_interval() {
        let config = EvictionConfig::with_max_size(1000).unwrap();
        let error = config.clone().interval(Duration::ZERO).unwrap_err();
        assert_eq!(error, ConfigError::ZeroInterval);
        assert_eq!(error.to_string(), "scan interval must be greater than zero");

        let config = config.interval(Duration::from_millis(1)).unwrap();
        assert_eq!(config.interval, Duration::from_millis(1));
    }
}
