use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use fs2::FileExt;
use parking_lot::RwLock;
use tracing::{debug, info};

use data::{
    encode_log_record, DataFile, LogRecord, RecordPos, RecordType, DATA_FILE_SUFFIX,
    MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
};
use fio::IoType;
use index::{IndexType, Indexer};

use crate::batch::{encode_record_key, parse_record_key, NON_BATCH_SEQ_NO};
use crate::options::Options;
use crate::util;
use crate::{Error, Result};

/// Name of the inter-process lock sentinel inside the database directory.
pub(crate) const FILE_LOCK_NAME: &str = "flock";
/// Key of the single record inside the seq-no file.
const SEQ_NO_KEY: &[u8] = b"seq.no";

/// The active data file plus the immutable older files, guarded together by
/// one writer lock. Rotation moves the active file into `older` and installs
/// a fresh one, all under the write half of the lock.
pub(crate) struct FileSet {
    pub(crate) active: Option<DataFile>,
    pub(crate) older: HashMap<u32, DataFile>,
}

/// Point-in-time statistics about a database.
#[derive(Debug, Clone)]
pub struct Stat {
    /// Number of live keys.
    pub key_num: usize,
    /// Number of data files on disk (older + active).
    pub data_file_num: usize,
    /// Bytes belonging to overwritten or tombstoned records; a merge
    /// reclaims this space.
    pub reclaimable_size: i64,
    /// Total bytes the database directory occupies.
    pub disk_size: u64,
}

/// A Bitcask-style storage engine instance bound to one directory.
///
/// # Write Path
///
/// 1. Encode the record (CRC32, varint-framed key/value).
/// 2. Under the writer lock: rotate the active file if it is full, append,
///    and apply the durability policy.
/// 3. Update the in-memory index with the new position.
///
/// # Read Path
///
/// 1. One index lookup to a `{file_id, offset}` position.
/// 2. One positional read from the active or an older file.
/// 3. Tombstones read as `KeyNotFound`.
///
/// # Recovery
///
/// [`Engine::open`] integrates any finished merge, loads the hint file, and
/// replays the remaining data files in id order, buffering batch records
/// until their commit marker proves the batch completed.
pub struct Engine {
    pub(crate) options: Options,
    pub(crate) files: RwLock<FileSet>,
    pub(crate) index: Box<dyn Indexer>,
    /// Batch sequence counter; 0 is reserved for non-batch writes.
    pub(crate) seq_no: AtomicU64,
    /// At most one merge runs at a time.
    pub(crate) is_merging: AtomicBool,
    /// Bytes made dead by overwrites and deletes since open.
    pub(crate) reclaim_size: AtomicI64,
    /// Bytes appended since the last sync, for the `bytes_per_sync` policy.
    bytes_write: AtomicU64,
    lock_file: File,
}

impl Engine {
    /// Opens (or creates) a database at `options.dir_path` and runs full
    /// recovery.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] when the options fail validation.
    /// - [`Error::DatabaseIsUsing`] when another process holds the lock.
    /// - [`Error::DataDirectoryCorrupted`] when a file name does not parse.
    /// - [`Error::InvalidCrc`] when a record fails its checksum mid-file.
    pub fn open(options: Options) -> Result<Engine> {
        check_options(&options)?;

        let dir_path = options.dir_path.clone();
        if !dir_path.is_dir() {
            fs::create_dir_all(&dir_path)?;
        }

        // one process per directory
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(dir_path.join(FILE_LOCK_NAME))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| Error::DatabaseIsUsing)?;

        let index = index::new_indexer(options.index_type, &dir_path, options.sync_writes);

        let mut engine = Engine {
            options,
            files: RwLock::new(FileSet {
                active: None,
                older: HashMap::new(),
            }),
            index,
            seq_no: AtomicU64::new(0),
            is_merging: AtomicBool::new(false),
            reclaim_size: AtomicI64::new(0),
            bytes_write: AtomicU64::new(0),
            lock_file,
        };

        // a finished merge left in a sibling directory replaces old segments
        engine.load_merge_files()?;

        let file_ids = engine.load_data_files()?;

        if engine.options.index_type != IndexType::BPlusTree {
            engine.load_index_from_hint_file()?;
            engine.load_index_from_data_files(&file_ids)?;
        } else {
            // the on-disk index survives restarts; only the sequence counter
            // and the append position need restoring
            engine.load_seq_no()?;
            let mut file_set = engine.files.write();
            if let Some(active) = file_set.active.as_mut() {
                active.write_offset = active.size()?;
            }
        }

        if engine.options.mmap_at_startup {
            engine.reset_io_type()?;
        }

        info!(
            path = %engine.options.dir_path.display(),
            data_files = file_ids.len(),
            keys = engine.index.size(),
            "database opened"
        );
        Ok(engine)
    }

    /// Stores `value` under `key`, overwriting any previous value.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }

        let record = LogRecord {
            key: encode_record_key(key, NON_BATCH_SEQ_NO),
            value: value.to_vec(),
            rec_type: RecordType::Normal,
        };
        let pos = {
            let mut file_set = self.files.write();
            self.append_log_record(&mut file_set, &record)?
        };

        if let Some(old_pos) = self.index.put(key.to_vec(), pos) {
            self.reclaim_size
                .fetch_add(i64::from(old_pos.size), Ordering::Relaxed);
        }
        Ok(())
    }

    /// Reads the newest value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let pos = self.index.get(key).ok_or(Error::KeyNotFound)?;
        self.value_at(pos)
    }

    /// Removes `key`. Deleting a key that does not exist succeeds without
    /// touching the log.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        if self.index.get(key).is_none() {
            return Ok(());
        }

        let record = LogRecord {
            key: encode_record_key(key, NON_BATCH_SEQ_NO),
            value: Vec::new(),
            rec_type: RecordType::Tombstone,
        };
        let pos = {
            let mut file_set = self.files.write();
            self.append_log_record(&mut file_set, &record)?
        };
        // the tombstone itself is dead weight from the moment it is written
        self.reclaim_size
            .fetch_add(i64::from(pos.size), Ordering::Relaxed);

        let (old_pos, was_present) = self.index.delete(key);
        if !was_present {
            return Err(Error::IndexUpdateFailed);
        }
        if let Some(old_pos) = old_pos {
            self.reclaim_size
                .fetch_add(i64::from(old_pos.size), Ordering::Relaxed);
        }
        Ok(())
    }

    /// Returns every live key in ascending order.
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        let mut iter = self.index.iterator(false);
        let mut keys = Vec::with_capacity(self.index.size());
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        keys
    }

    /// Calls `f(key, value)` for every live pair in ascending key order,
    /// stopping early when `f` returns `false`.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let mut iter = self.index.iterator(false);
        while iter.valid() {
            let value = self.value_at(iter.value())?;
            if !f(iter.key(), &value) {
                break;
            }
            iter.next();
        }
        Ok(())
    }

    /// Forces the active file to stable storage.
    pub fn sync(&self) -> Result<()> {
        let file_set = self.files.read();
        if let Some(active) = file_set.active.as_ref() {
            active.sync()?;
        }
        Ok(())
    }

    /// Point-in-time statistics for this database.
    pub fn stat(&self) -> Result<Stat> {
        let data_file_num = {
            let file_set = self.files.read();
            file_set.older.len() + usize::from(file_set.active.is_some())
        };
        Ok(Stat {
            key_num: self.index.size(),
            data_file_num,
            reclaimable_size: self.reclaim_size.load(Ordering::Relaxed),
            disk_size: util::dir_size(&self.options.dir_path)?,
        })
    }

    /// Shuts the database down: persists the sequence counter (B+ tree
    /// variant), syncs and releases every file, and drops the directory
    /// lock.
    pub fn close(&self) -> Result<()> {
        {
            let file_set = self.files.read();
            if file_set.active.is_none() {
                self.index.close();
                let _ = FileExt::unlock(&self.lock_file);
                return Ok(());
            }
        }
        self.index.close();

        // replay-based variants recover the counter from the log; the
        // on-disk B+ tree cannot, so persist it across the restart
        if self.options.index_type == IndexType::BPlusTree {
            let mut seq_file = DataFile::seq_no_file(&self.options.dir_path)?;
            let record = LogRecord {
                key: SEQ_NO_KEY.to_vec(),
                value: self
                    .seq_no
                    .load(Ordering::SeqCst)
                    .to_string()
                    .into_bytes(),
                rec_type: RecordType::Normal,
            };
            seq_file.write(&encode_log_record(&record))?;
            seq_file.sync()?;
        }

        let mut file_set = self.files.write();
        if let Some(active) = file_set.active.as_ref() {
            active.sync()?;
        }
        file_set.active = None;
        file_set.older.clear();
        FileExt::unlock(&self.lock_file)?;
        Ok(())
    }

    /// Resolves a position to its value, filtering tombstones.
    pub(crate) fn value_at(&self, pos: RecordPos) -> Result<Vec<u8>> {
        let file_set = self.files.read();
        let data_file = match file_set.active.as_ref() {
            Some(active) if active.file_id == pos.file_id => active,
            _ => file_set
                .older
                .get(&pos.file_id)
                .ok_or(Error::DataFileNotFound)?,
        };
        let (record, _) = data_file
            .read_log_record(pos.offset)?
            .ok_or(Error::KeyNotFound)?;
        if record.rec_type == RecordType::Tombstone {
            return Err(Error::KeyNotFound);
        }
        Ok(record.value)
    }

    /// Appends one record to the active file, rotating first when the file
    /// would overflow `data_file_size`. Callers hold the writer lock.
    pub(crate) fn append_log_record(
        &self,
        file_set: &mut FileSet,
        record: &LogRecord,
    ) -> Result<RecordPos> {
        let encoded = encode_log_record(record);
        let encoded_size = encoded.len() as i64;

        if file_set.active.is_none() {
            file_set.active = Some(DataFile::open(
                &self.options.dir_path,
                0,
                IoType::Standard,
            )?);
        }
        let needs_rotation = file_set
            .active
            .as_ref()
            .is_some_and(|active| active.write_offset + encoded_size > self.options.data_file_size);
        if needs_rotation {
            if let Some(old_active) = file_set.active.take() {
                // freeze the full file before anything else can fail
                old_active.sync()?;
                let next_id = old_active.file_id + 1;
                file_set.older.insert(old_active.file_id, old_active);
                file_set.active = Some(DataFile::open(
                    &self.options.dir_path,
                    next_id,
                    IoType::Standard,
                )?);
                debug!(file_id = next_id, "rotated active data file");
            }
        }
        let active = match file_set.active.as_mut() {
            Some(active) => active,
            None => return Err(Error::DataFileNotFound),
        };

        let write_offset = active.write_offset;
        active.write(&encoded)?;

        let unsynced = self
            .bytes_write
            .fetch_add(encoded.len() as u64, Ordering::Relaxed)
            + encoded.len() as u64;
        let need_sync = self.options.sync_writes
            || (self.options.bytes_per_sync > 0 && unsynced >= self.options.bytes_per_sync);
        if need_sync {
            active.sync()?;
            self.bytes_write.store(0, Ordering::Relaxed);
        }

        Ok(RecordPos {
            file_id: active.file_id,
            offset: write_offset,
            size: encoded.len() as u32,
        })
    }

    /// Enumerates `*.data` files, opens them (largest id becomes active),
    /// and returns the sorted ids for the replay pass.
    fn load_data_files(&mut self) -> Result<Vec<u32>> {
        let mut file_ids: Vec<u32> = Vec::new();
        for entry in fs::read_dir(&self.options.dir_path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) {
                let file_id = stem
                    .parse::<u32>()
                    .map_err(|_| Error::DataDirectoryCorrupted)?;
                file_ids.push(file_id);
            }
        }
        file_ids.sort_unstable();

        let io_type = if self.options.mmap_at_startup {
            IoType::MemoryMap
        } else {
            IoType::Standard
        };
        let mut file_set = self.files.write();
        for (i, &file_id) in file_ids.iter().enumerate() {
            let data_file = DataFile::open(&self.options.dir_path, file_id, io_type)?;
            if i == file_ids.len() - 1 {
                file_set.active = Some(data_file);
            } else {
                file_set.older.insert(file_id, data_file);
            }
        }
        Ok(file_ids)
    }

    /// Rebuilds the in-memory index by replaying every data file in id
    /// order.
    ///
    /// Batch records are buffered per sequence number and applied only when
    /// the batch's commit marker is reached; buffers whose marker never
    /// appears are dropped. Files older than a finished merge's cutoff are
    /// skipped; the hint file already covered them.
    fn load_index_from_data_files(&mut self, file_ids: &[u32]) -> Result<()> {
        if file_ids.is_empty() {
            return Ok(());
        }

        let mut non_merge_file_id = None;
        if self
            .options
            .dir_path
            .join(MERGE_FINISHED_FILE_NAME)
            .is_file()
        {
            non_merge_file_id = Some(self.non_merge_file_id(&self.options.dir_path)?);
        }

        let mut current_seq_no = NON_BATCH_SEQ_NO;
        let mut batch_records: HashMap<u64, Vec<(LogRecord, RecordPos)>> = HashMap::new();

        let file_set = self.files.write();
        let last = file_ids.len() - 1;
        let mut active_offset = 0i64;
        for (i, &file_id) in file_ids.iter().enumerate() {
            if let Some(cutoff) = non_merge_file_id {
                if file_id < cutoff {
                    continue;
                }
            }
            let data_file = match file_set.active.as_ref() {
                Some(active) if active.file_id == file_id => active,
                _ => file_set
                    .older
                    .get(&file_id)
                    .ok_or(Error::DataFileNotFound)?,
            };

            let mut offset = 0i64;
            loop {
                let entry = match data_file.read_log_record(offset) {
                    Ok(entry) => entry,
                    // a torn append at the tail is where the log ends
                    Err(data::Error::Io(ref e)) if e.kind() == ErrorKind::UnexpectedEof => None,
                    Err(err) => return Err(err.into()),
                };
                let Some((record, size)) = entry else { break };

                let pos = RecordPos {
                    file_id,
                    offset,
                    size: size as u32,
                };
                let (user_key, seq_no) = parse_record_key(&record.key)?;

                if seq_no == NON_BATCH_SEQ_NO {
                    self.update_index_on_replay(&user_key, record.rec_type, pos);
                } else if record.rec_type == RecordType::BatchFinished {
                    // the marker makes the whole batch visible at once
                    if let Some(entries) = batch_records.remove(&seq_no) {
                        for (batch_record, batch_pos) in entries {
                            self.update_index_on_replay(
                                &batch_record.key,
                                batch_record.rec_type,
                                batch_pos,
                            );
                        }
                    }
                } else {
                    let mut batch_record = record;
                    batch_record.key = user_key;
                    batch_records
                        .entry(seq_no)
                        .or_default()
                        .push((batch_record, pos));
                }

                if seq_no > current_seq_no {
                    current_seq_no = seq_no;
                }
                offset += size;
            }

            if i == last {
                active_offset = offset;
            }
        }
        drop(file_set);

        if !batch_records.is_empty() {
            debug!(
                batches = batch_records.len(),
                "dropped uncommitted batches during replay"
            );
        }

        let mut file_set = self.files.write();
        if let Some(active) = file_set.active.as_mut() {
            active.write_offset = active_offset;
        }

        self.seq_no.store(current_seq_no, Ordering::SeqCst);
        Ok(())
    }

    /// Applies one replayed record to the index, keeping the reclaimable
    /// counter in line with overwrites and deletes.
    fn update_index_on_replay(&self, key: &[u8], rec_type: RecordType, pos: RecordPos) {
        let old_pos = match rec_type {
            RecordType::Tombstone => {
                let (old_pos, _) = self.index.delete(key);
                self.reclaim_size
                    .fetch_add(i64::from(pos.size), Ordering::Relaxed);
                old_pos
            }
            _ => self.index.put(key.to_vec(), pos),
        };
        if let Some(old_pos) = old_pos {
            self.reclaim_size
                .fetch_add(i64::from(old_pos.size), Ordering::Relaxed);
        }
    }

    /// Restores the sequence counter persisted by the last clean close with
    /// the B+ tree index, then deletes the file so it cannot go stale.
    fn load_seq_no(&mut self) -> Result<()> {
        let path = self.options.dir_path.join(SEQ_NO_FILE_NAME);
        if !path.is_file() {
            return Ok(());
        }
        let seq_file = DataFile::seq_no_file(&self.options.dir_path)?;
        if let Some((record, _)) = seq_file.read_log_record(0)? {
            let seq_no = std::str::from_utf8(&record.value)
                .ok()
                .and_then(|text| text.parse::<u64>().ok())
                .ok_or(Error::DataDirectoryCorrupted)?;
            self.seq_no.store(seq_no, Ordering::SeqCst);
        }
        fs::remove_file(path)?;
        Ok(())
    }

    /// Reopens every data file with the standard backend once the
    /// memory-mapped recovery pass is done.
    fn reset_io_type(&self) -> Result<()> {
        let mut file_set = self.files.write();
        if let Some(active) = file_set.active.as_mut() {
            active.set_io_backend(&self.options.dir_path, IoType::Standard)?;
        }
        for data_file in file_set.older.values_mut() {
            data_file.set_io_backend(&self.options.dir_path, IoType::Standard)?;
        }
        Ok(())
    }
}

/// Directory-lock release and a final sync are best-effort on drop; data is
/// already durable up to the configured sync policy.
impl Drop for Engine {
    fn drop(&mut self) {
        let file_set = self.files.read();
        if let Some(active) = file_set.active.as_ref() {
            let _ = active.sync();
        }
        let _ = FileExt::unlock(&self.lock_file);
    }
}

fn check_options(options: &Options) -> Result<()> {
    if options.dir_path.as_os_str().is_empty() {
        return Err(Error::InvalidConfig(
            "database dir path is empty".to_string(),
        ));
    }
    if options.data_file_size <= 0 {
        return Err(Error::InvalidConfig(
            "database data file size must be greater than 0".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&options.data_file_merge_ratio) {
        return Err(Error::InvalidConfig(
            "database merge ratio must be between 0 and 1".to_string(),
        ));
    }
    Ok(())
}

/// Builds the sibling directory a merge writes into: `<dir>-merge`.
pub(crate) fn merge_path(dir_path: &Path) -> std::path::PathBuf {
    let mut name = dir_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "undertow".into());
    name.push("-merge");
    match dir_path.parent() {
        Some(parent) => parent.join(name),
        None => name.into(),
    }
}
