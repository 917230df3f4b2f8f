//! # fio: positional file I/O backends
//!
//! Every data file in the engine performs exactly two kinds of I/O: random
//! reads at a known offset, and appends at the end. This crate abstracts
//! those behind the [`IoBackend`] trait so the engine can swap the backing
//! implementation without touching the record layer.
//!
//! Two backends are provided:
//!
//! - [`StandardIo`]: a plain file descriptor using `pread`-style positional
//!   reads and `O_APPEND` writes. Used for all normal operation.
//! - [`MmapIo`]: a read-only memory map. Used only while replaying data
//!   files at startup, where sequential decode over a mapped region is much
//!   faster than issuing one `pread` per record. The engine swaps every file
//!   back to [`StandardIo`] before serving traffic.

mod mmap;
mod standard;

pub use mmap::MmapIo;
pub use standard::StandardIo;

use std::io;
use std::path::Path;

/// Which backend to open a file with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    /// Standard file descriptor I/O.
    Standard,
    /// Read-only memory-mapped I/O (startup replay only).
    MemoryMap,
}

/// Positional I/O over a single file.
///
/// Implementations must support concurrent `read_at` calls through a shared
/// reference; `write` appends at the current end of file and is serialized
/// by the caller.
pub trait IoBackend: Send + Sync {
    /// Fills `buf` with bytes starting at `offset`.
    ///
    /// Returns `ErrorKind::UnexpectedEof` if the file ends before `buf` is
    /// full.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;

    /// Appends `buf` at the end of the file, returning the number of bytes
    /// written.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Flushes file contents to stable storage (fsync).
    fn sync(&self) -> io::Result<()>;

    /// Current size of the file in bytes.
    fn size(&self) -> io::Result<u64>;
}

/// Opens the file at `path` with the requested backend, creating it if it
/// does not exist.
pub fn new_io_backend(path: &Path, io_type: IoType) -> io::Result<Box<dyn IoBackend>> {
    match io_type {
        IoType::Standard => Ok(Box::new(StandardIo::open(path)?)),
        IoType::MemoryMap => Ok(Box::new(MmapIo::open(path)?)),
    }
}
