use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use memmap2::Mmap;

use crate::IoBackend;

/// Read-only memory-mapped backend.
///
/// Maps the whole file once at open time. The mapping is never grown, so
/// this backend is only suitable for files that are not being appended to:
/// in practice, data files during startup replay. `write` and `sync` report
/// `ErrorKind::Unsupported`.
pub struct MmapIo {
    /// `None` when the file was empty at open time (zero-length files cannot
    /// be mapped).
    map: Option<Mmap>,
}

impl MmapIo {
    /// Opens (or creates) `path` and maps it read-only.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            // Safety: the engine holds an exclusive directory lock and never
            // appends to a file while it is memory-mapped, so the mapped
            // region cannot be mutated underneath us.
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self { map })
    }

    fn len(&self) -> u64 {
        self.map.as_ref().map_or(0, |m| m.len() as u64)
    }
}

impl IoBackend for MmapIo {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "read offset overflow"))?;
        if end > self.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of mapped file",
            ));
        }
        let map = match self.map.as_ref() {
            Some(m) => m,
            None => return Ok(()), // only reachable for empty reads
        };
        buf.copy_from_slice(&map[offset as usize..end as usize]);
        Ok(())
    }

    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "memory-mapped backend is read-only",
        ))
    }

    fn sync(&self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "memory-mapped backend is read-only",
        ))
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.len())
    }
}
