//! Common functionality for the symbolication service.
//!
//! This crate exposes a set of key types:
//!
//!  - [`ModuleRef`]: The identity of a module build, `(debug_file, debug_id)`. It selects the
//!    symbol file used to resolve frames and keys every cache layer.
//!  - Functions to map module references onto the directory layout used by Breakpad symbol
//!    servers, and to check that untrusted names are safe to use as path components.
//!
//! # Features
//!
//! - `serde` (optional): Implements `serde::Deserialize` and `serde::Serialize` for all data types.
//!   In the `symbolic` crate, this feature is exposed via `common-serde`.
//!
//! This module is part of the `symbolic` crate.

#![warn(missing_docs)]

mod path;
mod types;

pub use crate::path::*;
pub use crate::types::*;

pub use debugid::*;
