use std::collections::BTreeMap;

use data::RecordPos;
use parking_lot::RwLock;

use crate::{IndexIterator, Indexer, SnapshotIterator};

/// Ordered in-memory index over a balanced tree.
///
/// The default variant: a `BTreeMap` behind a read-write lock. Lookups take
/// the read lock, mutations the write lock; iterators materialize a snapshot
/// so they never hold the lock past construction.
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, RecordPos>>,
}

impl BTreeIndex {
    pub fn new() -> BTreeIndex {
        BTreeIndex {
            tree: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for BTreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, pos: RecordPos) -> Option<RecordPos> {
        self.tree.write().insert(key, pos)
    }

    fn get(&self, key: &[u8]) -> Option<RecordPos> {
        self.tree.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> (Option<RecordPos>, bool) {
        let old = self.tree.write().remove(key);
        let was_present = old.is_some();
        (old, was_present)
    }

    fn size(&self) -> usize {
        self.tree.read().len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let guard = self.tree.read();
        let items: Vec<(Vec<u8>, RecordPos)> = if reverse {
            guard.iter().rev().map(|(k, v)| (k.clone(), *v)).collect()
        } else {
            guard.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };
        Box::new(SnapshotIterator::new(items, reverse))
    }
}
