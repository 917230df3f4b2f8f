//! Configuration for an UndertowKV instance.
//!
//! Plain structs with workable defaults; validation happens once in
//! [`Engine::open`](crate::Engine::open).

use std::path::PathBuf;

use index::IndexType;

/// Main configuration for one database directory.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding all data files (required, non-empty).
    pub dir_path: PathBuf,

    /// Maximum bytes per data file; reaching it rotates the active file.
    pub data_file_size: i64,

    /// fsync after every append (safest, slowest).
    pub sync_writes: bool,

    /// fsync once this many bytes have accumulated since the last sync;
    /// `0` disables the threshold.
    pub bytes_per_sync: u64,

    /// Which in-memory index variant to use.
    pub index_type: IndexType,

    /// Replay data files through a read-only memory map at startup.
    pub mmap_at_startup: bool,

    /// Merge only once `reclaimable / total ≥ ratio`; must be within [0, 1].
    pub data_file_merge_ratio: f32,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            dir_path: std::env::temp_dir().join("undertow-data"),
            data_file_size: 256 * 1024 * 1024, // 256 MiB
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            mmap_at_startup: true,
            data_file_merge_ratio: 0.5,
        }
    }
}

/// Options for [`Engine::iter`](crate::Engine::iter).
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only yield keys starting with this prefix; empty matches everything.
    pub prefix: Vec<u8>,

    /// Iterate in descending key order.
    pub reverse: bool,
}

/// Options for [`Engine::new_write_batch`](crate::Engine::new_write_batch).
#[derive(Debug, Clone)]
pub struct WriteBatchOptions {
    /// Maximum number of staged records in one batch.
    pub max_batch_num: usize,

    /// fsync the active file when the batch commits.
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> WriteBatchOptions {
        WriteBatchOptions {
            max_batch_num: 10_000,
            sync_writes: true,
        }
    }
}
