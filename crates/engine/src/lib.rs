//! # Engine - UndertowKV Storage Engine
//!
//! The central orchestrator that ties together the [`fio`], [`data`], and
//! [`index`] crates into a complete Bitcask-style key-value store: an
//! append-only log of immutable data files plus an in-memory directory of
//! the newest position for every live key.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                   ENGINE                      │
//! │                                               │
//! │ put/delete → append to active file            │
//! │                |                              │
//! │                |  (DataFileSize reached?)     │
//! │                |            yes               │
//! │                v                              │
//! │           rotate → new active file            │
//! │                |                              │
//! │                v                              │
//! │           index.put(key, {file, offset})      │
//! │                                               │
//! │ get → index lookup → one positional read      │
//! │ merge.rs → copy live records + hint file      │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module        | Purpose                                                |
//! |---------------|--------------------------------------------------------|
//! | `db`          | `Engine` struct, open/recovery, write/read path, stats |
//! | `batch`       | atomic multi-record batches with commit markers        |
//! | `iterator`    | prefix/reverse iteration over live keys                |
//! | `merge`       | compaction: copy live records forward, hint file       |
//! | `options`     | configuration with validated defaults                  |
//! | `errors`      | the public error kinds                                 |
//!
//! ## Crash Safety
//!
//! Every record carries a CRC32 and is appended in a single write. Recovery
//! replays data files in id order, dropping any batch whose commit marker
//! never made it to disk, and stops cleanly at a torn tail. A finished merge
//! is made visible atomically by the `merge-finished` marker file; an
//! unfinished merge directory is discarded on the next open.

mod batch;
mod db;
mod errors;
mod iterator;
mod merge;
mod options;
mod util;

pub use batch::WriteBatch;
pub use db::{Engine, Stat};
pub use errors::{Error, Result};
pub use iterator::EngineIterator;
pub use options::{IteratorOptions, Options, WriteBatchOptions};

pub use index::IndexType;

#[cfg(test)]
mod tests;
