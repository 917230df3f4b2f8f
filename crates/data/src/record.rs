use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;

/// Maximum encoded header size: 4 (crc) + 1 (type) + 5 + 5 (two varints).
pub const MAX_LOG_RECORD_HEADER_SIZE: usize = 15;

/// Discriminates what a log record means to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// A live key-value pair.
    Normal = 0,
    /// A deletion marker for the key.
    Tombstone = 1,
    /// Commit marker sealing an atomic batch.
    BatchFinished = 2,
}

impl RecordType {
    pub(crate) fn from_byte(b: u8) -> Option<RecordType> {
        match b {
            0 => Some(RecordType::Normal),
            1 => Some(RecordType::Tombstone),
            2 => Some(RecordType::BatchFinished),
            _ => None,
        }
    }
}

/// A single record appended to a data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Encoded key bytes (sequence-number prefix + user key).
    pub key: Vec<u8>,
    /// Value bytes; empty for tombstones and commit markers.
    pub value: Vec<u8>,
    /// What this record means.
    pub rec_type: RecordType,
}

/// Decoded header of an on-disk record.
#[derive(Debug, Clone, Copy)]
pub struct LogRecordHeader {
    /// Stored CRC32 of everything after the CRC field.
    pub crc: u32,
    /// Raw type byte. Validated only after the CRC passes, so corrupt bytes
    /// fail as `InvalidCrc` rather than silently truncating a replay.
    pub rec_type: u8,
    /// Length of the encoded key.
    pub key_size: u32,
    /// Length of the value.
    pub value_size: u32,
}

/// Location of one encoded record inside one data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPos {
    /// Which data file the record lives in.
    pub file_id: u32,
    /// Byte offset of the record inside that file.
    pub offset: i64,
    /// Total encoded size, used for reclaimable-space accounting.
    pub size: u32,
}

/// Appends `x` as an unsigned base-128 varint.
pub fn put_uvarint(buf: &mut Vec<u8>, mut x: u64) {
    while x >= 0x80 {
        buf.push(x as u8 | 0x80);
        x >>= 7;
    }
    buf.push(x as u8);
}

/// Appends `x` as a zigzag-encoded signed varint.
pub fn put_varint(buf: &mut Vec<u8>, x: i64) {
    let mut ux = (x as u64) << 1;
    if x < 0 {
        ux = !ux;
    }
    put_uvarint(buf, ux);
}

/// Decodes an unsigned varint from the front of `buf`, returning the value
/// and the number of bytes consumed. `None` if the buffer is truncated or
/// the encoding overflows 64 bits.
pub fn uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut x = 0u64;
    let mut shift = 0u32;
    for (i, &b) in buf.iter().enumerate() {
        if i == 10 {
            return None;
        }
        if b < 0x80 {
            if i == 9 && b > 1 {
                return None;
            }
            return Some((x | (u64::from(b) << shift), i + 1));
        }
        x |= u64::from(b & 0x7f) << shift;
        shift += 7;
    }
    None
}

/// Decodes a zigzag-encoded signed varint from the front of `buf`.
pub fn varint(buf: &[u8]) -> Option<(i64, usize)> {
    let (ux, n) = uvarint(buf)?;
    let mut x = (ux >> 1) as i64;
    if ux & 1 != 0 {
        x = !x;
    }
    Some((x, n))
}

/// Serializes a record into its on-disk form.
///
/// The CRC is computed last, over every byte after the CRC field itself, and
/// written back into the first four bytes.
pub fn encode_log_record(record: &LogRecord) -> Vec<u8> {
    let mut buf =
        Vec::with_capacity(MAX_LOG_RECORD_HEADER_SIZE + record.key.len() + record.value.len());
    buf.extend_from_slice(&[0u8; 4]);
    buf.push(record.rec_type as u8);
    put_varint(&mut buf, record.key.len() as i64);
    put_varint(&mut buf, record.value.len() as i64);
    buf.extend_from_slice(&record.key);
    buf.extend_from_slice(&record.value);

    let mut hasher = Crc32::new();
    hasher.update(&buf[4..]);
    let crc = hasher.finalize();
    LittleEndian::write_u32(&mut buf[..4], crc);
    buf
}

/// Decodes a record header from the front of `buf`.
///
/// Returns the header and its encoded length, or `None` when `buf` is too
/// short to contain one (at most four bytes, or a truncated varint); the
/// caller treats that as end of stream.
pub fn decode_log_record_header(buf: &[u8]) -> Option<(LogRecordHeader, usize)> {
    if buf.len() <= 4 {
        return None;
    }
    let crc = LittleEndian::read_u32(&buf[..4]);
    let rec_type = buf[4];

    let mut index = 5;
    let (key_size, n) = varint(&buf[index..])?;
    index += n;
    let (value_size, n) = varint(&buf[index..])?;
    index += n;

    Some((
        LogRecordHeader {
            crc,
            rec_type,
            key_size: key_size as u32,
            value_size: value_size as u32,
        },
        index,
    ))
}

/// Recomputes the CRC of a record from its decoded parts.
///
/// `header_after_crc` must be the serialized header bytes minus the leading
/// four CRC bytes, exactly as they appear on disk.
pub fn log_record_crc(record: &LogRecord, header_after_crc: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(header_after_crc);
    hasher.update(&record.key);
    hasher.update(&record.value);
    hasher.finalize()
}

/// Serializes a [`RecordPos`] for storage in hint files and the on-disk
/// B+ tree index.
pub fn encode_record_pos(pos: RecordPos) -> Vec<u8> {
    let mut buf = Vec::with_capacity(15);
    put_varint(&mut buf, i64::from(pos.file_id));
    put_varint(&mut buf, pos.offset);
    put_varint(&mut buf, i64::from(pos.size));
    buf
}

/// Inverse of [`encode_record_pos`]. `None` on a truncated buffer.
pub fn decode_record_pos(buf: &[u8]) -> Option<RecordPos> {
    let (file_id, n) = varint(buf)?;
    let (offset, m) = varint(&buf[n..])?;
    let (size, _) = varint(&buf[n + m..])?;
    Some(RecordPos {
        file_id: file_id as u32,
        offset,
        size: size as u32,
    })
}
