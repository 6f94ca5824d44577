//! Wire codec for journal records.
//!
//! Every record is framed as `u32 LE length | u8 tag | payload`, where
//! `length` counts the tag byte plus the payload. Data files carry `Put`
//! records; reader state files carry `ReadHead` and `ReadDone`. Tags 4
//! through 6 are reserved for transactional-read records written by higher
//! layers and are opaque to this crate.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::config::ItemId;
use crate::error::{JournalError, JournalResult};

pub const TAG_PUT: u8 = 1;
pub const TAG_READ_HEAD: u8 = 2;
pub const TAG_READ_DONE: u8 = 3;
const TAG_RESERVED_MIN: u8 = 4;
const TAG_RESERVED_MAX: u8 = 6;

/// Byte length of the fixed portion of a `Put` payload (id, add time,
/// expire time).
const PUT_FIXED_LEN: usize = 24;

/// One item appended to the queue. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Monotonically increasing id, unique per queue, starting at 1.
    pub id: ItemId,
    /// Absolute timestamp of the append, in milliseconds since the epoch.
    pub add_time_ms: i64,
    /// Optional absolute expiry timestamp in milliseconds. Expiry is
    /// enforced by the layer above; the journal only persists it.
    pub expire_time_ms: Option<i64>,
    /// Opaque payload bytes.
    pub data: Vec<u8>,
}

/// A decoded journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// An appended item; the only record kind this crate writes to data
    /// files.
    Put(QueueItem),
    /// Latest head of a reader; written to reader state files.
    ReadHead(ItemId),
    /// The out-of-order done set of a reader, sorted ascending.
    ReadDone(Vec<ItemId>),
    /// A reserved transactional-read record. Skipped on read, never written
    /// by this crate.
    Reserved { tag: u8 },
}

impl Record {
    pub fn tag(&self) -> u8 {
        match self {
            Record::Put(_) => TAG_PUT,
            Record::ReadHead(_) => TAG_READ_HEAD,
            Record::ReadDone(_) => TAG_READ_DONE,
            Record::Reserved { tag } => *tag,
        }
    }

    /// Encodes the full frame: length prefix, tag, payload.
    pub fn encode(&self) -> JournalResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let frame_len = payload.len() + 1;
        if frame_len > u32::MAX as usize {
            return Err(JournalError::invalid_config("record payload too large"));
        }
        let mut buf = Vec::with_capacity(4 + frame_len);
        buf.write_u32::<LittleEndian>(frame_len as u32)?;
        buf.write_u8(self.tag())?;
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    fn encode_payload(&self) -> JournalResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Record::Put(item) => {
                buf.write_u64::<LittleEndian>(item.id.as_u64())?;
                buf.write_i64::<LittleEndian>(item.add_time_ms)?;
                buf.write_i64::<LittleEndian>(item.expire_time_ms.unwrap_or(0))?;
                buf.extend_from_slice(&item.data);
            }
            Record::ReadHead(id) => {
                buf.write_u64::<LittleEndian>(id.as_u64())?;
            }
            Record::ReadDone(ids) => {
                for id in ids {
                    buf.write_u64::<LittleEndian>(id.as_u64())?;
                }
            }
            Record::Reserved { .. } => {
                return Err(JournalError::invalid_config(
                    "reserved record tags are written by higher layers",
                ));
            }
        }
        Ok(buf)
    }

    /// Decodes a tag and payload into a record. `position` is the byte
    /// offset of the frame start, used to anchor error reports.
    pub fn decode(tag: u8, payload: &[u8], position: u64) -> JournalResult<Record> {
        match tag {
            TAG_PUT => {
                if payload.len() < PUT_FIXED_LEN {
                    return Err(JournalError::corruption(
                        position,
                        "put record payload truncated",
                    ));
                }
                let mut cursor = Cursor::new(payload);
                let id = ItemId::new(cursor.read_u64::<LittleEndian>()?);
                let add_time_ms = cursor.read_i64::<LittleEndian>()?;
                let expire_raw = cursor.read_i64::<LittleEndian>()?;
                Ok(Record::Put(QueueItem {
                    id,
                    add_time_ms,
                    expire_time_ms: (expire_raw != 0).then_some(expire_raw),
                    data: payload[PUT_FIXED_LEN..].to_vec(),
                }))
            }
            TAG_READ_HEAD => {
                if payload.len() != 8 {
                    return Err(JournalError::corruption(
                        position,
                        "read-head record payload must be 8 bytes",
                    ));
                }
                let mut cursor = Cursor::new(payload);
                Ok(Record::ReadHead(ItemId::new(
                    cursor.read_u64::<LittleEndian>()?,
                )))
            }
            TAG_READ_DONE => {
                if payload.len() % 8 != 0 {
                    return Err(JournalError::corruption(
                        position,
                        "read-done record payload is not a whole number of ids",
                    ));
                }
                let mut cursor = Cursor::new(payload);
                let mut ids = Vec::with_capacity(payload.len() / 8);
                for _ in 0..payload.len() / 8 {
                    ids.push(ItemId::new(cursor.read_u64::<LittleEndian>()?));
                }
                Ok(Record::ReadDone(ids))
            }
            TAG_RESERVED_MIN..=TAG_RESERVED_MAX => Ok(Record::Reserved { tag }),
            _ => Err(JournalError::UnknownTag { tag, position }),
        }
    }
}
