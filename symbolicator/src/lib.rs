//! The `symbolicator` service.
//!
//! This crate wires the symbolication libraries into three subcommands, all configured through the
//! same arguments and `SYMBOLICATOR_*` environment variables:
//!
//!  - `run`: Serves `POST /symbolicate/v4`, `POST /symbolicate/v5` and `GET /health`.
//!  - `cleanup`: Keeps the shared symbol cache within its size budget. Run exactly one of these per
//!    cache directory, next to any number of servers.
//!  - `symbolicate`: Resolves a single request file and prints the v5 response.

pub mod cli;
pub mod commands;
pub mod server;
