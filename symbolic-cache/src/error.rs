use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// An error returned when accessing the [`CacheStore`](crate::CacheStore).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CacheError {
    /// A file system operation on a cache path failed.
    #[error("failed to {action} {}", .path.display())]
    Io {
        /// The operation that failed.
        action: &'static str,
        /// The path the operation was performed on.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The cache directory could not be walked.
    #[error("failed to scan cache directory")]
    Scan(#[from] walkdir::Error),
}

impl CacheError {
    pub(crate) fn io<P: Into<PathBuf>>(action: &'static str, path: P, source: io::Error) -> Self {
        CacheError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// An invalid [`EvictionConfig`](crate::EvictionConfig).
#[non_exhaustive]
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// The low watermark is not below the maximum size.
    #[error("low watermark ({low_watermark} bytes) must be below the maximum cache size ({max_size} bytes)")]
    Watermarks {
        /// The configured maximum size.
        max_size: u64,
        /// The configured low watermark.
        low_watermark: u64,
    },

    /// The scan interval is zero.
    #[error("scan interval must be greater than zero")]
    ZeroInterval,
}

/// An error that aborted an eviction cycle.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EvictionError {
    /// The cache contents could not be listed.
    #[error("failed to list cache entries")]
    Scan(#[from] CacheError),

    /// The cycle panicked or was cancelled on the blocking thread pool.
    #[error("eviction cycle crashed")]
    Crashed(#[source] tokio::task::JoinError),
}
