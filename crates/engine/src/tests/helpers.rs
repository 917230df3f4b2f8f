use std::path::Path;

use rand::Rng;

use crate::{IndexType, Options};

/// Options tuned for tests: small-ish files, merge always allowed.
pub(crate) fn test_options(dir: &Path) -> Options {
    Options {
        dir_path: dir.to_path_buf(),
        data_file_size: 64 * 1024 * 1024,
        sync_writes: false,
        bytes_per_sync: 0,
        index_type: IndexType::BTree,
        mmap_at_startup: true,
        data_file_merge_ratio: 0.0,
    }
}

/// Deterministic zero-padded key, comparable across runs.
pub(crate) fn test_key(i: usize) -> Vec<u8> {
    format!("undertow-key-{:09}", i).into_bytes()
}

/// Random printable value of roughly `n` bytes.
pub(crate) fn rand_value(n: usize) -> Vec<u8> {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let mut value = b"undertow-value-".to_vec();
    value.extend((0..n).map(|_| CHARSET[rng.gen_range(0..CHARSET.len())]));
    value
}
