//! Support for Breakpad ASCII symbol files, used by the Breakpad and Crashpad libraries.
//!
//! A symbol file describes a single module build. Its first line is a `MODULE` header, followed by
//! `FILE`, `FUNC` (with their line records) and `PUBLIC` records, and finally stack unwinding
//! information. This crate turns such a file into a [`SymbolTable`]: an address-ordered list of
//! symbols that resolves module-relative offsets to function names with a binary search.
//!
//! ```
//! use symbolic_breakpad::SymbolTable;
//!
//! let data = b"MODULE windows x86_64 44E4EC8C2F41492B9369D6B9A059577C2 xul.pdb
//! FUNC 1000 20 0 foo
//! PUBLIC 2000 0 bar
//! ";
//!
//! let table = SymbolTable::parse(data).unwrap();
//! assert_eq!(table.module().name, "xul.pdb");
//!
//! let lookup = table.lookup(0x1010).unwrap();
//! assert_eq!(lookup.symbol.name, "foo");
//! assert_eq!(lookup.offset, 0x10);
//! ```
//!
//! Parsing is a single linear pass over the file followed by one sort. Individual records that
//! cannot be parsed are skipped, so one corrupt line does not invalidate the rest of the table.

#![warn(missing_docs)]

mod error;
mod lines;
pub mod records;
mod symtab;

pub use crate::error::*;
pub use crate::symtab::*;
