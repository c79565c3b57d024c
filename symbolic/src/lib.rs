//! [Symbolic](https://docs.rs/symbolic) resolves raw stack frames of native applications to
//! function names using Breakpad symbol files. It consists of multiple largely independent crates
//! which are bundled together in this facade.
//!
//! # What's in the package
//!
//! - Parsing of Breakpad ASCII symbol files into address-ordered symbol tables
//! - A disk cache for symbol files that can be shared by many worker processes
//! - Background eviction keeping that cache within a size budget
//! - Fetching symbol files from local directories and HTTP symbol servers
//! - A batch symbolication service with the `v4` and `v5` response formats
//!
//! # Usage
//!
//! Add `symbolic` as a dependency to your `Cargo.toml` and activate the features you need:
//!
//! - **`breakpad`** (default): Parsing of Breakpad symbol files and address lookups.
//! - **`cache`**: The on-disk symbol file cache and its eviction manager.
//! - **`symbolication`**: Symbol sources, the resolver and the symbolication service. This
//!   implies all of the above.
//!
//! The **`common-serde`** feature adds `serde::{Deserialize, Serialize}` implementations to the
//! common types.

#![warn(missing_docs)]

#[doc(inline)]
#[cfg(feature = "breakpad")]
pub use symbolic_breakpad as breakpad;
#[doc(inline)]
#[cfg(feature = "cache")]
pub use symbolic_cache as cache;
#[doc(inline)]
pub use symbolic_common as common;
#[doc(inline)]
#[cfg(feature = "symbolication")]
pub use symbolic_symbolication as symbolication;
