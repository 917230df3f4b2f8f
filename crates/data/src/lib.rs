//! # data: the append-only log format
//!
//! Defines the on-disk record codec and the [`DataFile`] type that owns one
//! log segment.
//!
//! ## Binary Record Format
//!
//! ```text
//! [crc32: u32 LE][type: u8][key_len: varint][val_len: varint][key][value]
//! ```
//!
//! The CRC covers everything after its own four bytes. `key_len` and
//! `val_len` are zigzag varints (at most five bytes each), so the header is
//! between 7 and 15 bytes. A region of zeroes decodes as an all-zero header
//! and is treated as end of stream.
//!
//! Keys stored on disk carry an unsigned-varint sequence-number prefix; this
//! crate treats the prefixed bytes as the key and leaves the prefix to the
//! engine layer.

mod file;
mod record;

pub use file::{
    DataFile, DATA_FILE_SUFFIX, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
};
pub use record::{
    decode_log_record_header, decode_record_pos, encode_log_record, encode_record_pos,
    log_record_crc, put_uvarint, put_varint, uvarint, varint, LogRecord, LogRecordHeader,
    RecordPos, RecordType, MAX_LOG_RECORD_HEADER_SIZE,
};

use thiserror::Error;

/// Errors surfaced by the record and data-file layer.
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A record's recomputed CRC did not match the stored CRC.
    #[error("invalid crc value, log record maybe corrupted")]
    InvalidCrc,
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
