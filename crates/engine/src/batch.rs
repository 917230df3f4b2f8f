//! Atomic multi-record batches.
//!
//! A batch stages mutations in memory, keyed by user key so later staged
//! operations supersede earlier ones. On commit every staged record is
//! appended under a fresh batch sequence number, followed by one commit
//! marker record; recovery only applies records whose marker made it to
//! disk, which makes the whole batch atomic across crashes.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use data::{put_uvarint, uvarint, LogRecord, RecordType};

use crate::db::Engine;
use crate::options::WriteBatchOptions;
use crate::{Error, Result};

/// Sequence number reserved for writes outside any batch.
pub(crate) const NON_BATCH_SEQ_NO: u64 = 0;

/// Key of the commit marker record sealing a batch.
const BATCH_FINISHED_KEY: &[u8] = b"txn-fin";

/// A set of writes that commit atomically.
///
/// Staged mutations are invisible to reads until [`commit`](WriteBatch::commit)
/// returns. Last write wins per key within a batch.
pub struct WriteBatch<'a> {
    engine: &'a Engine,
    options: WriteBatchOptions,
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
}

impl Engine {
    /// Creates an empty write batch bound to this engine.
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> WriteBatch<'_> {
        WriteBatch {
            engine: self,
            options,
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl WriteBatch<'_> {
    /// Stages a put. Supersedes any previously staged operation on `key`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let mut pending = self.pending.lock();
        pending.insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: value.to_vec(),
                rec_type: RecordType::Normal,
            },
        );
        Ok(())
    }

    /// Stages a delete.
    ///
    /// Deleting a key that is neither staged nor in the index is a no-op;
    /// deleting a staged-but-unindexed key just unstages it.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let mut pending = self.pending.lock();
        if self.engine.index.get(key).is_none() {
            pending.remove(key);
            return Ok(());
        }
        pending.insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: Vec::new(),
                rec_type: RecordType::Tombstone,
            },
        );
        Ok(())
    }

    /// Commits every staged record atomically.
    ///
    /// # Protocol
    ///
    /// 1. Allocate a fresh sequence number under the engine writer lock.
    /// 2. Append every staged record with the sequence prefixed to its key.
    /// 3. Append the commit marker; only now can recovery see the batch.
    /// 4. Optionally fsync, then apply all staged records to the index.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_num {
            return Err(Error::ExceedMaxBatchNum);
        }

        let mut file_set = self.engine.files.write();
        let seq_no = self.engine.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

        let mut positions = Vec::with_capacity(pending.len());
        for (key, staged) in pending.iter() {
            let pos = self.engine.append_log_record(
                &mut file_set,
                &LogRecord {
                    key: encode_record_key(key, seq_no),
                    value: staged.value.clone(),
                    rec_type: staged.rec_type,
                },
            )?;
            positions.push((key.clone(), staged.rec_type, pos));
        }

        // the marker is what makes the batch visible to recovery
        self.engine.append_log_record(
            &mut file_set,
            &LogRecord {
                key: encode_record_key(BATCH_FINISHED_KEY, seq_no),
                value: Vec::new(),
                rec_type: RecordType::BatchFinished,
            },
        )?;

        if self.options.sync_writes {
            if let Some(active) = file_set.active.as_ref() {
                active.sync()?;
            }
        }

        // apply to the index while still holding the writer lock so the
        // batch appears atomically to racing readers
        for (key, rec_type, pos) in positions {
            let old_pos = match rec_type {
                RecordType::Tombstone => {
                    let (old_pos, _) = self.engine.index.delete(&key);
                    self.engine
                        .reclaim_size
                        .fetch_add(i64::from(pos.size), Ordering::Relaxed);
                    old_pos
                }
                _ => self.engine.index.put(key, pos),
            };
            if let Some(old_pos) = old_pos {
                self.engine
                    .reclaim_size
                    .fetch_add(i64::from(old_pos.size), Ordering::Relaxed);
            }
        }

        pending.clear();
        Ok(())
    }
}

/// Prefixes `key` with an unsigned-varint sequence number, producing the
/// effective key stored on disk.
pub(crate) fn encode_record_key(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(key.len() + 10);
    put_uvarint(&mut encoded, seq_no);
    encoded.extend_from_slice(key);
    encoded
}

/// Splits an effective key back into the user key and its sequence number.
pub(crate) fn parse_record_key(key: &[u8]) -> Result<(Vec<u8>, u64)> {
    let (seq_no, n) = uvarint(key).ok_or(Error::DataDirectoryCorrupted)?;
    Ok((key[n..].to_vec(), seq_no))
}
