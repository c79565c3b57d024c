//! A size-bounded disk cache for symbol files.
//!
//! Fetching symbol files from remote storage is slow and the set of modules queried over time is
//! far larger than the local disk. This crate provides the two halves of the local cache:
//!
//!  - [`CacheStore`]: Content storage keyed by [`ModuleRef`](symbolic_common::ModuleRef). It can
//!    be shared by many worker processes without locks, since every write is an atomic rename.
//!  - [`EvictionManager`]: A background task that periodically scans the store and removes the
//!    least-recently-used entries once it exceeds its budget.
//!
//! ```no_run
//! use symbolic_cache::{CacheStore, EvictionConfig, EvictionManager};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = CacheStore::open("/var/cache/symbols")?;
//! let config = EvictionConfig::new(40 << 30, 36 << 30)?;
//!
//! EvictionManager::new(store, config)
//!     .run_until(async {
//!         tokio::signal::ctrl_c().await.ok();
//!     })
//!     .await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod error;
mod eviction;
mod store;

pub use crate::error::*;
pub use crate::eviction::*;
pub use crate::store::*;
