//! Log records
//!
//! Defines log identities, cancellation cookies, and the record frame shared
//! with the recovery layer.
//!
//! ## Record Format (little-endian)
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────────┬──────────┬───────────┐
//! │ Len (4)  │ Index (4) │ Type (4) │   Payload    │ Len (4)  │ Index (4) │
//! └──────────┴───────────┴──────────┴──────────────┴──────────┴───────────┘
//!  \________ header ______________/                 \______ tail ______/
//! ```
//!
//! `Len` is the full frame length (header + payload + tail) and appears in
//! both header and tail so a reader can walk the log from either end.
//! A LOGID record (type [`LOGID_MAGIC`]) carries `{oid: u64, generation: u32}`.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{CatlogError, Result};

/// Header size: length (4) + index (4) + type (4)
pub const RECORD_HEADER_SIZE: usize = 12;

/// Tail size: length (4) + index (4)
pub const RECORD_TAIL_SIZE: usize = 8;

/// Type tag of a catalog record that names one segment
pub const LOGID_MAGIC: u32 = 0x1064_553b;

/// Payload size of a LOGID record: oid (8) + generation (4)
pub const LOGID_PAYLOAD_SIZE: usize = 12;

// =============================================================================
// Identities
// =============================================================================

/// Identity of a log object on the backing store
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LogId {
    /// Object id
    pub oid: u64,
    /// Generation of the object id
    pub generation: u32,
}

impl LogId {
    pub fn new(oid: u64, generation: u32) -> Self {
        Self { oid, generation }
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}:{:#x}", self.oid, self.generation)
    }
}

impl FromStr for LogId {
    type Err = CatlogError;

    /// Parses `0xOID:0xGEN` (the `0x` prefixes are optional)
    fn from_str(s: &str) -> Result<Self> {
        let (oid, generation) = s
            .split_once(':')
            .ok_or_else(|| CatlogError::InvalidRecord(format!("malformed log id '{}'", s)))?;

        let parse = |part: &str| {
            let digits = part.trim_start_matches("0x");
            u64::from_str_radix(digits, 16)
                .map_err(|e| CatlogError::InvalidRecord(format!("malformed log id '{}': {}", s, e)))
        };

        let generation = u32::try_from(parse(generation)?)
            .map_err(|_| CatlogError::InvalidRecord(format!("generation out of range in '{}'", s)))?;

        Ok(Self::new(parse(oid)?, generation))
    }
}

/// Stable address of one record: the log holding it and its slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cookie {
    pub log: LogId,
    pub index: u32,
}

impl Cookie {
    pub fn new(log: LogId, index: u32) -> Self {
        Self { log, index }
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.log, self.index)
    }
}

// =============================================================================
// Records
// =============================================================================

/// A single record: type tag, slot index and opaque payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Slot index inside the owning log (0 until written)
    pub index: u32,

    /// Record type tag
    pub type_tag: u32,

    /// Opaque payload
    pub payload: Bytes,
}

impl LogRecord {
    /// Create an unwritten record
    pub fn new(type_tag: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            index: 0,
            type_tag,
            payload: payload.into(),
        }
    }

    /// Build the catalog record that names segment `id`
    pub fn logid(id: LogId) -> Self {
        let mut payload = BytesMut::with_capacity(LOGID_PAYLOAD_SIZE);
        payload.put_u64_le(id.oid);
        payload.put_u32_le(id.generation);
        Self::new(LOGID_MAGIC, payload.freeze())
    }

    /// Copy of this record placed at `index`
    pub fn with_index(&self, index: u32) -> Self {
        Self {
            index,
            type_tag: self.type_tag,
            payload: self.payload.clone(),
        }
    }

    pub fn is_logid(&self) -> bool {
        self.type_tag == LOGID_MAGIC
    }

    /// Segment named by a LOGID record
    pub fn as_logid(&self) -> Result<LogId> {
        if !self.is_logid() {
            return Err(CatlogError::InvalidRecord(format!(
                "expected LOGID record at index {}, found type {:#x}",
                self.index, self.type_tag
            )));
        }
        if self.payload.len() != LOGID_PAYLOAD_SIZE {
            return Err(CatlogError::InvalidRecord(format!(
                "LOGID payload is {} bytes, expected {}",
                self.payload.len(),
                LOGID_PAYLOAD_SIZE
            )));
        }

        let mut payload = &self.payload[..];
        let oid = payload.get_u64_le();
        let generation = payload.get_u32_le();
        Ok(LogId::new(oid, generation))
    }

    /// Full encoded frame length
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len() + RECORD_TAIL_SIZE
    }

    /// Encode to the wire frame
    pub fn encode(&self) -> Bytes {
        let len = self.encoded_len() as u32;
        let mut buf = BytesMut::with_capacity(len as usize);

        buf.put_u32_le(len);
        buf.put_u32_le(self.index);
        buf.put_u32_le(self.type_tag);
        buf.put_slice(&self.payload);
        buf.put_u32_le(len);
        buf.put_u32_le(self.index);

        buf.freeze()
    }

    /// Decode exactly one frame; trailing bytes are an error
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (record, consumed) = Self::decode_prefix(bytes)?;
        if consumed != bytes.len() {
            return Err(CatlogError::InvalidRecord(format!(
                "{} trailing bytes after record",
                bytes.len() - consumed
            )));
        }
        Ok(record)
    }

    /// Decode the frame at the start of `bytes`, returning it and its length
    pub fn decode_prefix(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < RECORD_HEADER_SIZE + RECORD_TAIL_SIZE {
            return Err(CatlogError::InvalidRecord(format!(
                "incomplete record: {} bytes",
                bytes.len()
            )));
        }

        let mut header = &bytes[..RECORD_HEADER_SIZE];
        let len = header.get_u32_le() as usize;
        let index = header.get_u32_le();
        let type_tag = header.get_u32_le();

        if len < RECORD_HEADER_SIZE + RECORD_TAIL_SIZE {
            return Err(CatlogError::InvalidRecord(format!(
                "record length {} below minimum",
                len
            )));
        }
        if bytes.len() < len {
            return Err(CatlogError::InvalidRecord(format!(
                "incomplete record: expected {} bytes, got {}",
                len,
                bytes.len()
            )));
        }

        let mut tail = &bytes[len - RECORD_TAIL_SIZE..len];
        let tail_len = tail.get_u32_le() as usize;
        let tail_index = tail.get_u32_le();
        if tail_len != len || tail_index != index {
            return Err(CatlogError::InvalidRecord(format!(
                "tail ({}, {}) does not match header ({}, {})",
                tail_len, tail_index, len, index
            )));
        }

        let payload = Bytes::copy_from_slice(&bytes[RECORD_HEADER_SIZE..len - RECORD_TAIL_SIZE]);
        Ok((
            Self {
                index,
                type_tag,
                payload,
            },
            len,
        ))
    }
}
