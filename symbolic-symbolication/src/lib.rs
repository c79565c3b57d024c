//! Symbolication of stack traces against Breakpad symbol files.
//!
//! This crate turns batches of raw stack frames, given as pairs of a module and a module-relative
//! offset, into function names. It consists of three layers:
//!
//!  - [`SymbolSource`]: The storage holding symbol files, for instance a symbol server reachable
//!    over HTTP ([`HttpSource`]) or a local directory ([`FilesystemSource`]). Sources distinguish
//!    files that are confirmed missing from transient failures.
//!  - [`SymbolResolver`]: Loads symbol tables through an in-process LRU and a shared
//!    [`CacheStore`](symbolic_cache::CacheStore) on disk, and falls back to the source on a miss.
//!  - [`SymbolicationService`]: Validates requests, loads all modules of a request concurrently and
//!    renders the results in the `v4` and `v5` response formats.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use symbolic_cache::CacheStore;
//! use symbolic_symbolication::{
//!     HttpSource, ResolverConfig, ServiceConfig, SourceSet, SymbolResolver, SymbolicationService,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let sources = SourceSet::new().with(HttpSource::new("https://symbols.example.org")?);
//! let cache = CacheStore::open("/var/cache/symbols")?;
//! let resolver = SymbolResolver::new(sources, Some(cache), ResolverConfig::default());
//! let service = SymbolicationService::new(Arc::new(resolver), ServiceConfig::default());
//!
//! let body = br#"{"jobs": [{"memoryMap": [["xul.pdb", "44E4EC8C2F41492B9369D6B9A059577C2"]], "stacks": [[[0, 4096]]]}]}"#;
//! let response = service.symbolicate_v5(body).await?;
//! println!("{}", serde_json::to_string_pretty(&response)?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod error;
mod memory;
mod resolver;
mod service;
mod sources;
mod types;

pub use crate::error::*;
pub use crate::resolver::*;
pub use crate::service::*;
pub use crate::sources::*;
pub use crate::types::*;
