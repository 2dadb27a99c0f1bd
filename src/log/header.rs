//! Log Header
//!
//! Per-log bookkeeping persisted next to the records: flags, occupancy
//! bitmap and index cursors.
//!
//! ## Persisted Format
//! ```text
//! ┌──────────┬──────────┬──────────────────────────────┐
//! │ CRC (4)  │ Len (4)  │  bincode(LogHeader)          │
//! └──────────┴──────────┴──────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CatlogError, Result};

use super::IndexBitmap;

/// Magic identifying a persisted log header
pub const HEADER_MAGIC: u32 = 0x1064_5539;

/// Log holds ordinary records
pub const LOG_F_IS_PLAIN: u32 = 0x1;

/// Log holds LOGID records naming segments
pub const LOG_F_IS_CAT: u32 = 0x2;

/// Destroy the log once its last live record is cancelled
pub const LOG_F_ZAP_WHEN_EMPTY: u32 = 0x4;

/// Size of the checksum + length prefix
const FRAME_PREFIX: usize = 8;

/// Bookkeeping header shared by plain logs and catalogs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogHeader {
    pub magic: u32,

    /// `LOG_F_*` flags
    pub flags: u32,

    /// Live slots
    pub bitmap: IndexBitmap,

    /// Most recently written slot (0 when nothing has been written)
    pub last_index: u32,

    /// Catalogs only: boundary slot before the oldest live slot
    pub oldest_index: u32,

    /// Plain logs only: slot of this log's LOGID record in its catalog
    pub catalog_slot: u32,
}

impl LogHeader {
    /// Header for a new segment owned by a catalog
    pub fn plain(capacity: u32, catalog_slot: u32) -> Self {
        Self {
            magic: HEADER_MAGIC,
            flags: LOG_F_IS_PLAIN | LOG_F_ZAP_WHEN_EMPTY,
            bitmap: IndexBitmap::new(capacity),
            last_index: 0,
            oldest_index: 0,
            catalog_slot,
        }
    }

    /// Header for a new catalog
    pub fn catalog(capacity: u32) -> Self {
        Self {
            magic: HEADER_MAGIC,
            flags: LOG_F_IS_CAT,
            bitmap: IndexBitmap::new(capacity),
            last_index: 0,
            oldest_index: 0,
            catalog_slot: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.bitmap.capacity()
    }

    pub fn is_plain(&self) -> bool {
        self.flags & LOG_F_IS_PLAIN != 0
    }

    pub fn is_catalog(&self) -> bool {
        self.flags & LOG_F_IS_CAT != 0
    }

    pub fn zap_when_empty(&self) -> bool {
        self.flags & LOG_F_ZAP_WHEN_EMPTY != 0
    }

    /// True while another record fits after `last_index`
    pub fn has_room(&self) -> bool {
        self.last_index < self.capacity() - 1
    }

    /// True when the live range crosses slot 0
    pub fn is_wrapped(&self) -> bool {
        self.oldest_index > self.last_index
    }

    /// Serialize with checksum prefix
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|e| CatlogError::Serialization(format!("log header: {}", e)))?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&body);
        let crc = hasher.finalize();

        let mut buf = Vec::with_capacity(FRAME_PREFIX + body.len());
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Deserialize and verify checksum and magic
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FRAME_PREFIX {
            return Err(CatlogError::Corruption(format!(
                "log header truncated: {} bytes",
                bytes.len()
            )));
        }

        let crc = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let body = bytes.get(FRAME_PREFIX..FRAME_PREFIX + len).ok_or_else(|| {
            CatlogError::Corruption(format!(
                "log header body truncated: expected {} bytes, got {}",
                len,
                bytes.len() - FRAME_PREFIX
            ))
        })?;

        if crc32fast::hash(body) != crc {
            return Err(CatlogError::Corruption("log header checksum mismatch".to_string()));
        }

        let header: LogHeader = bincode::deserialize(body)
            .map_err(|e| CatlogError::Serialization(format!("log header: {}", e)))?;
        if header.magic != HEADER_MAGIC {
            return Err(CatlogError::Corruption(format!(
                "bad log header magic {:#x}",
                header.magic
            )));
        }
        Ok(header)
    }
}
