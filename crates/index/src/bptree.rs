use std::ops::Bound;
use std::path::Path;

use data::{decode_record_pos, encode_record_pos, RecordPos};
use redb::{Database, Durability, ReadOnlyTable, ReadableTable, ReadableTableMetadata,
    TableDefinition};

/// File name of the on-disk index inside the database directory.
const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";

const INDEX_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("undertow-index");

use crate::{IndexIterator, Indexer};

/// Persistent B+ tree index.
///
/// Wraps a single-table redb database whose values are varint-encoded
/// [`RecordPos`] entries. Because the mapping survives restarts, the engine
/// skips the data-file replay entirely when this variant is selected.
///
/// Index mutations are individually committed transactions. A storage
/// failure here leaves the engine with an index it can neither trust nor
/// rebuild mid-flight, so these wrappers panic instead of propagating.
pub struct BPlusTree {
    db: Database,
    sync_writes: bool,
}

impl BPlusTree {
    /// Opens (or creates) the index file inside `dir_path`.
    ///
    /// Panics if the file cannot be opened or the table cannot be created;
    /// the engine has no way to run without its index.
    pub fn open(dir_path: &Path, sync_writes: bool) -> BPlusTree {
        let db = Database::create(dir_path.join(BPTREE_INDEX_FILE_NAME))
            .expect("failed to open bptree index at startup");
        // Make sure the table exists so later reads never race its creation.
        let txn = db.begin_write().expect("failed to start bptree txn");
        txn.open_table(INDEX_TABLE)
            .expect("failed to create bptree index table");
        txn.commit().expect("failed to commit bptree txn");
        BPlusTree { db, sync_writes }
    }

    fn begin_write(&self) -> redb::WriteTransaction {
        let mut txn = self.db.begin_write().expect("failed to start bptree txn");
        if !self.sync_writes {
            txn.set_durability(Durability::Eventual);
        }
        txn
    }
}

impl Indexer for BPlusTree {
    fn put(&self, key: Vec<u8>, pos: RecordPos) -> Option<RecordPos> {
        let txn = self.begin_write();
        let old = {
            let mut table = txn
                .open_table(INDEX_TABLE)
                .expect("failed to open bptree index table");
            let encoded = encode_record_pos(pos);
            table
                .insert(key.as_slice(), encoded.as_slice())
                .expect("failed to put key in bptree")
                .map(|guard| decode_record_pos(guard.value()))
        };
        txn.commit().expect("failed to commit bptree txn");
        old.flatten()
    }

    fn get(&self, key: &[u8]) -> Option<RecordPos> {
        let txn = self
            .db
            .begin_read()
            .expect("failed to start bptree read txn");
        let table = txn
            .open_table(INDEX_TABLE)
            .expect("failed to open bptree index table");
        let guard = table.get(key).expect("failed to get key in bptree")?;
        decode_record_pos(guard.value())
    }

    fn delete(&self, key: &[u8]) -> (Option<RecordPos>, bool) {
        let txn = self.begin_write();
        let old = {
            let mut table = txn
                .open_table(INDEX_TABLE)
                .expect("failed to open bptree index table");
            table
                .remove(key)
                .expect("failed to delete key in bptree")
                .map(|guard| decode_record_pos(guard.value()))
        };
        txn.commit().expect("failed to commit bptree txn");
        let was_present = old.is_some();
        (old.flatten(), was_present)
    }

    fn size(&self) -> usize {
        let txn = self
            .db
            .begin_read()
            .expect("failed to start bptree read txn");
        let table = txn
            .open_table(INDEX_TABLE)
            .expect("failed to open bptree index table");
        table.len().expect("failed to get size of bptree") as usize
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let txn = self
            .db
            .begin_read()
            .expect("failed to start bptree read txn");
        let table = txn
            .open_table(INDEX_TABLE)
            .expect("failed to open bptree index table");
        let mut iter = BPlusTreeIterator {
            _txn: txn,
            table,
            current: None,
            closed: false,
            reverse,
        };
        iter.rewind();
        Box::new(iter)
    }
}

/// Live cursor over the B+ tree.
///
/// Holds a read transaction's table for its whole lifetime, so it observes a
/// stable snapshot while writers keep committing. Stepping re-anchors a
/// range query at the current key, which keeps the iterator valid without
/// materializing the key set.
struct BPlusTreeIterator {
    /// Keeps the snapshot pinned for the cursor's lifetime.
    _txn: redb::ReadTransaction,
    table: ReadOnlyTable<&'static [u8], &'static [u8]>,
    current: Option<(Vec<u8>, RecordPos)>,
    closed: bool,
    reverse: bool,
}

impl BPlusTreeIterator {
    fn first_in(
        &self,
        bounds: (Bound<&[u8]>, Bound<&[u8]>),
    ) -> Option<(Vec<u8>, RecordPos)> {
        let mut range = self.table.range::<&[u8]>(bounds).ok()?;
        let entry = if self.reverse {
            range.next_back()
        } else {
            range.next()
        };
        let (key_guard, value_guard) = entry?.ok()?;
        let pos = decode_record_pos(value_guard.value())?;
        Some((key_guard.value().to_vec(), pos))
    }
}

impl IndexIterator for BPlusTreeIterator {
    fn rewind(&mut self) {
        if self.closed {
            return;
        }
        self.current = self.first_in((Bound::Unbounded, Bound::Unbounded));
    }

    fn seek(&mut self, key: &[u8]) {
        if self.closed {
            return;
        }
        self.current = if self.reverse {
            self.first_in((Bound::Unbounded, Bound::Included(key)))
        } else {
            self.first_in((Bound::Included(key), Bound::Unbounded))
        };
    }

    fn next(&mut self) {
        if self.closed {
            return;
        }
        self.current = match self.current.take() {
            Some((key, _)) => {
                if self.reverse {
                    self.first_in((Bound::Unbounded, Bound::Excluded(key.as_slice())))
                } else {
                    self.first_in((Bound::Excluded(key.as_slice()), Bound::Unbounded))
                }
            }
            None => None,
        };
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        let (key, _) = self
            .current
            .as_ref()
            .expect("key() on an exhausted bptree iterator");
        key
    }

    fn value(&self) -> RecordPos {
        let (_, pos) = self
            .current
            .as_ref()
            .expect("value() on an exhausted bptree iterator");
        *pos
    }

    fn close(&mut self) {
        self.current = None;
        self.closed = true;
    }
}
