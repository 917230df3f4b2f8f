//! Merge (compaction): reclaims space held by overwritten and deleted
//! records.
//!
//! A merge copies every live record (the index is authoritative about
//! liveness) into freshly numbered data files inside a sibling `-merge`
//! directory, together with a `hint-index` file mapping each key to its new
//! position. A final `merge-finished` record seals the output; the next
//! [`Engine::open`] atomically swaps the merge output into the data
//! directory and uses the hint file to rebuild the index without replaying
//! the merged segments. A merge directory without the finished marker is an
//! interrupted merge and is discarded.

use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;

use tracing::{debug, info};

use data::{
    decode_record_pos, encode_log_record, DataFile, LogRecord, RecordPos, RecordType,
    HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
};
use fio::IoType;

use crate::batch::{encode_record_key, NON_BATCH_SEQ_NO};
use crate::db::{merge_path, Engine, FILE_LOCK_NAME};
use crate::{Error, Result};

/// Key of the single record inside the merge-finished file.
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

impl Engine {
    /// Runs a merge, copying live records forward and leaving a hint file
    /// for the next startup.
    ///
    /// # Errors
    ///
    /// - [`Error::MergeInProgress`] when another merge is already running.
    /// - [`Error::MergeRatioUnreached`] when reclaimable bytes have not
    ///   reached `data_file_merge_ratio` of the directory size.
    pub fn merge(&self) -> Result<()> {
        {
            let file_set = self.files.read();
            if file_set.active.is_none() {
                return Ok(());
            }
        }
        if self
            .is_merging
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::MergeInProgress);
        }
        let result = self.do_merge();
        self.is_merging.store(false, Ordering::SeqCst);
        result
    }

    fn do_merge(&self) -> Result<()> {
        // Rotate under the writer lock so everything below the cutoff id is
        // frozen; writes keep flowing into the new active file meanwhile.
        let non_merge_file_id = {
            let mut file_set = self.files.write();

            let total_size = crate::util::dir_size(&self.options.dir_path)?;
            let reclaimable = self.reclaim_size.load(Ordering::Relaxed);
            if total_size > 0
                && (reclaimable as f32 / total_size as f32) < self.options.data_file_merge_ratio
            {
                return Err(Error::MergeRatioUnreached);
            }

            match file_set.active.take() {
                Some(active) => {
                    active.sync()?;
                    let next_id = active.file_id + 1;
                    file_set.older.insert(active.file_id, active);
                    file_set.active = Some(DataFile::open(
                        &self.options.dir_path,
                        next_id,
                        IoType::Standard,
                    )?);
                    next_id
                }
                None => return Ok(()),
            }
        };
        info!(cutoff = non_merge_file_id, "merge started");

        let merge_path = merge_path(&self.options.dir_path);
        if merge_path.exists() {
            fs::remove_dir_all(&merge_path)?;
        }
        fs::create_dir_all(&merge_path)?;

        let mut merge_active = DataFile::open(&merge_path, 0, IoType::Standard)?;
        let mut hint_file = DataFile::hint_file(&merge_path)?;
        let mut copied = 0u64;

        let mut index_iter = self.index.iterator(false);
        while index_iter.valid() {
            let pos = index_iter.value();
            if pos.file_id < non_merge_file_id {
                let key = index_iter.key().to_vec();
                let record = {
                    let file_set = self.files.read();
                    let data_file = file_set
                        .older
                        .get(&pos.file_id)
                        .ok_or(Error::DataFileNotFound)?;
                    let (record, _) = data_file
                        .read_log_record(pos.offset)?
                        .ok_or(Error::DataFileNotFound)?;
                    record
                };

                // the index pointed here, so the record is live; rewrite it
                // without any batch prefix
                let rewritten = LogRecord {
                    key: encode_record_key(&key, NON_BATCH_SEQ_NO),
                    value: record.value,
                    rec_type: RecordType::Normal,
                };
                let encoded = encode_log_record(&rewritten);
                if merge_active.write_offset + encoded.len() as i64 > self.options.data_file_size
                {
                    merge_active.sync()?;
                    let next_id = merge_active.file_id + 1;
                    merge_active = DataFile::open(&merge_path, next_id, IoType::Standard)?;
                }
                let offset = merge_active.write_offset;
                merge_active.write(&encoded)?;

                let new_pos = RecordPos {
                    file_id: merge_active.file_id,
                    offset,
                    size: encoded.len() as u32,
                };
                hint_file.write_hint_record(&key, new_pos)?;
                copied += 1;
            }
            index_iter.next();
        }

        hint_file.sync()?;
        merge_active.sync()?;

        // the finished marker is what makes this merge count
        let mut finished_file = DataFile::merge_finished_file(&merge_path)?;
        let finished_record = LogRecord {
            key: MERGE_FINISHED_KEY.to_vec(),
            value: non_merge_file_id.to_string().into_bytes(),
            rec_type: RecordType::Normal,
        };
        finished_file.write(&encode_log_record(&finished_record))?;
        finished_file.sync()?;

        info!(cutoff = non_merge_file_id, records = copied, "merge finished");
        Ok(())
    }

    /// Integrates a previous merge's output directory, if one exists.
    ///
    /// Called from [`Engine::open`] before data files are loaded. The merge
    /// directory is always removed afterwards, whether it was integrated or
    /// discarded as interrupted.
    pub(crate) fn load_merge_files(&mut self) -> Result<()> {
        let merge_path = merge_path(&self.options.dir_path);
        if !merge_path.is_dir() {
            return Ok(());
        }
        let result = self.integrate_merge_files(&merge_path);
        fs::remove_dir_all(&merge_path)?;
        result
    }

    fn integrate_merge_files(&mut self, merge_path: &Path) -> Result<()> {
        let mut merge_finished = false;
        let mut merge_file_names: Vec<OsString> = Vec::new();
        for entry in fs::read_dir(merge_path)? {
            let entry = entry?;
            let name = entry.file_name();
            if name == SEQ_NO_FILE_NAME || name == FILE_LOCK_NAME {
                continue;
            }
            if name == MERGE_FINISHED_FILE_NAME {
                merge_finished = true;
            }
            merge_file_names.push(name);
        }
        if !merge_finished {
            debug!("discarding interrupted merge directory");
            return Ok(());
        }

        // every segment the merge covered is now redundant
        let non_merge_file_id = self.non_merge_file_id(merge_path)?;
        for file_id in 0..non_merge_file_id {
            let path = DataFile::file_name(&self.options.dir_path, file_id);
            if path.is_file() {
                fs::remove_file(path)?;
            }
        }

        for name in merge_file_names {
            let src = merge_path.join(&name);
            let dst = self.options.dir_path.join(&name);
            fs::rename(src, dst)?;
        }
        info!(cutoff = non_merge_file_id, "merge output integrated");
        Ok(())
    }

    /// Reads the cutoff id out of a `merge-finished` file in `dir`.
    pub(crate) fn non_merge_file_id(&self, dir: &Path) -> Result<u32> {
        let finished_file = DataFile::merge_finished_file(dir)?;
        let (record, _) = finished_file
            .read_log_record(0)?
            .ok_or(Error::DataDirectoryCorrupted)?;
        std::str::from_utf8(&record.value)
            .ok()
            .and_then(|text| text.parse::<u32>().ok())
            .ok_or(Error::DataDirectoryCorrupted)
    }

    /// Registers every hint-file entry directly in the index, skipping the
    /// decode of the real records entirely.
    pub(crate) fn load_index_from_hint_file(&self) -> Result<()> {
        let path = self.options.dir_path.join(HINT_FILE_NAME);
        if !path.is_file() {
            return Ok(());
        }
        let hint_file = DataFile::hint_file(&self.options.dir_path)?;
        let mut offset = 0i64;
        while let Some((record, size)) = hint_file.read_log_record(offset)? {
            let pos = decode_record_pos(&record.value).ok_or(Error::DataDirectoryCorrupted)?;
            self.index.put(record.key, pos);
            offset += size;
        }
        Ok(())
    }
}
