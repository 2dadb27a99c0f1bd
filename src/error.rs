//! Error types for catlog
//!
//! Provides a unified error type for all operations.
//!
//! Bookkeeping corruption detected while allocating an index (a slot the
//! allocator considers free is already marked live) is not represented
//! here: it panics, because every other operation depends on the bitmap
//! being correct.

use thiserror::Error;

use crate::record::LogId;

/// Result type alias using CatlogError
pub type Result<T> = std::result::Result<T, CatlogError>;

/// Unified error type for catlog operations
#[derive(Debug, Error)]
pub enum CatlogError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Exhaustion
    // -------------------------------------------------------------------------
    #[error("No free catalog slots (capacity {capacity})")]
    CatalogFull { capacity: u32 },

    #[error("Log {log} is full")]
    LogFull { log: LogId },

    // -------------------------------------------------------------------------
    // Not Found / Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Log {0} not found")]
    LogNotFound(LogId),

    #[error("Record {index} not found in log {log}")]
    RecordNotFound { log: LogId, index: u32 },

    #[error("Invalid index {index} for log {log}")]
    InvalidIndex { log: LogId, index: u32 },

    #[error("Log {0} already exists")]
    AlreadyExists(LogId),

    // -------------------------------------------------------------------------
    // Format Errors
    // -------------------------------------------------------------------------
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    #[error("Transaction error: {0}")]
    Transaction(String),

    // -------------------------------------------------------------------------
    // Batch / Scan Outcomes
    // -------------------------------------------------------------------------
    #[error("Cancel of {failed} of {total} records failed: {source}")]
    CancelFailed {
        failed: usize,
        total: usize,
        #[source]
        source: Box<CatlogError>,
    },

    #[error("Scan aborted by processor with code {code}")]
    Aborted { code: i32 },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Worker Errors
    // -------------------------------------------------------------------------
    #[error("Recovery worker error: {0}")]
    Worker(String),
}

impl CatlogError {
    /// True for outcomes that mean "nothing there to act on": a missing log
    /// or an already-cancelled record.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CatlogError::LogNotFound(_) | CatlogError::RecordNotFound { .. }
        )
    }
}
