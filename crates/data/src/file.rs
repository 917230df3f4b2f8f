use std::path::{Path, PathBuf};

use fio::{new_io_backend, IoBackend, IoType};

use crate::record::{
    decode_log_record_header, encode_log_record, encode_record_pos, log_record_crc, LogRecord,
    RecordPos, RecordType, MAX_LOG_RECORD_HEADER_SIZE,
};
use crate::{Error, Result};

/// Suffix of every log segment file.
pub const DATA_FILE_SUFFIX: &str = ".data";
/// Post-merge fast-recovery index, written next to the merged segments.
pub const HINT_FILE_NAME: &str = "hint-index";
/// Marker file written after a merge completes successfully.
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
/// Persisted sequence counter, present only across a B+ tree-indexed close.
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

/// One append-only log segment.
///
/// The file with the largest id is the engine's active file and the only one
/// ever appended to; every other data file is immutable. `write_offset`
/// tracks where the next append will land and always equals the on-disk size
/// of the active file.
pub struct DataFile {
    /// Monotonically increasing segment id.
    pub file_id: u32,
    /// Offset of the next append.
    pub write_offset: i64,
    io: Box<dyn IoBackend>,
}

impl DataFile {
    /// Opens (or creates) the data file with the given id inside `dir`.
    pub fn open(dir: &Path, file_id: u32, io_type: IoType) -> Result<DataFile> {
        let path = Self::file_name(dir, file_id);
        Self::new(&path, file_id, io_type)
    }

    /// Opens the hint file inside `dir`.
    pub fn hint_file(dir: &Path) -> Result<DataFile> {
        Self::new(&dir.join(HINT_FILE_NAME), 0, IoType::Standard)
    }

    /// Opens the merge-finished marker file inside `dir`.
    pub fn merge_finished_file(dir: &Path) -> Result<DataFile> {
        Self::new(&dir.join(MERGE_FINISHED_FILE_NAME), 0, IoType::Standard)
    }

    /// Opens the sequence-counter file inside `dir`.
    pub fn seq_no_file(dir: &Path) -> Result<DataFile> {
        Self::new(&dir.join(SEQ_NO_FILE_NAME), 0, IoType::Standard)
    }

    /// Full path of the data file with the given id: `NNNNNNNNN.data`.
    pub fn file_name(dir: &Path, file_id: u32) -> PathBuf {
        dir.join(format!("{:09}{}", file_id, DATA_FILE_SUFFIX))
    }

    fn new(path: &Path, file_id: u32, io_type: IoType) -> Result<DataFile> {
        let io = new_io_backend(path, io_type)?;
        Ok(DataFile {
            file_id,
            write_offset: 0,
            io,
        })
    }

    /// Reads the record starting at `offset`.
    ///
    /// Returns the decoded record and its total encoded size, or `Ok(None)`
    /// at end of stream: past the last byte, on a header too short to
    /// decode, or on an all-zero header. A stored CRC that does not match
    /// the recomputed one fails with [`Error::InvalidCrc`].
    pub fn read_log_record(&self, offset: i64) -> Result<Option<(LogRecord, i64)>> {
        let file_size = self.io.size()? as i64;
        if offset >= file_size {
            return Ok(None);
        }

        // Clamp the header read so the tail of the file can be decoded.
        let header_bytes = MAX_LOG_RECORD_HEADER_SIZE.min((file_size - offset) as usize);
        let mut header_buf = vec![0u8; header_bytes];
        self.io.read_at(&mut header_buf, offset as u64)?;

        let (header, header_size) = match decode_log_record_header(&header_buf) {
            Some(decoded) => decoded,
            None => return Ok(None),
        };
        if header.crc == 0 && header.key_size == 0 && header.value_size == 0 {
            return Ok(None);
        }

        let key_size = header.key_size as usize;
        let value_size = header.value_size as usize;
        let record_size = header_size + key_size + value_size;

        let mut kv_buf = vec![0u8; key_size + value_size];
        if key_size + value_size > 0 {
            self.io
                .read_at(&mut kv_buf, (offset + header_size as i64) as u64)?;
        }
        let value = kv_buf.split_off(key_size);

        let rec_type = RecordType::from_byte(header.rec_type).ok_or(Error::InvalidCrc)?;
        let record = LogRecord {
            key: kv_buf,
            value,
            rec_type,
        };

        if log_record_crc(&record, &header_buf[4..header_size]) != header.crc {
            return Err(Error::InvalidCrc);
        }
        Ok(Some((record, record_size as i64)))
    }

    /// Appends raw encoded bytes and advances `write_offset`.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.io.write(buf)?;
        self.write_offset += n as i64;
        Ok(n)
    }

    /// Appends a hint record: the user key paired with the encoded position
    /// of the real record in the merged data files.
    pub fn write_hint_record(&mut self, key: &[u8], pos: RecordPos) -> Result<()> {
        let record = LogRecord {
            key: key.to_vec(),
            value: encode_record_pos(pos),
            rec_type: RecordType::Normal,
        };
        self.write(&encode_log_record(&record))?;
        Ok(())
    }

    /// Flushes the file to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.io.sync()?;
        Ok(())
    }

    /// On-disk size of the file.
    pub fn size(&self) -> Result<i64> {
        Ok(self.io.size()? as i64)
    }

    /// Replaces the I/O backend, reopening the same file with `io_type`.
    ///
    /// Used once recovery finishes to move from the memory-mapped backend
    /// back to standard file I/O.
    pub fn set_io_backend(&mut self, dir: &Path, io_type: IoType) -> Result<()> {
        self.io = new_io_backend(&Self::file_name(dir, self.file_id), io_type)?;
        Ok(())
    }
}
