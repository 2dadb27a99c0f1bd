//! # catlog
//!
//! A catalog-structured recovery log:
//! - Fixed-capacity segments holding records that must survive a crash
//! - A catalog log indexing the segments in a circular slot ring
//! - Two-phase (declare/execute) appends inside store transactions
//! - Cancellation by cookie, destroying segments as they empty
//! - Forward and reverse replay for recovery, wraparound aware
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Callers / Recovery Worker / CLI                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ add / cancel / process
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      Catalog                                 │
//! │     (catalog RwLock → segment RwLock, slot ring bitmap)      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  LogHandle  │          │  LogHandle  │
//!   │  (catalog)  │          │  (segment)  │
//!   └──────┬──────┘          └──────┬──────┘
//!          └────────────┬────────────┘
//!                       ▼
//!               ┌───────────────┐
//!               │   LogStore    │
//!               │ (Mem / File)  │
//!               └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod log;
pub mod store;
pub mod catalog;
pub mod recovery;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CatlogError, Result};
pub use config::{Config, SyncStrategy};
pub use record::{Cookie, LogId, LogRecord};
pub use store::{FileStore, LogStore, MemStore, Transaction};
pub use catalog::{
    CancelSummary, Catalog, CatalogStats, LogEntry, RecordProcessor, ReverseCursor, ScanControl,
    ScanCursor, ScanPosition, ScanSummary,
};
pub use recovery::{RecoveryHandle, RecoveryOutcome, RecoveryWorker};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of catlog
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
