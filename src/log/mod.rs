//! Log Module
//!
//! A single fixed-capacity log: the building block of both segments and
//! the catalog that indexes them.
//!
//! ## Responsibilities
//! - Occupancy bitmap with circular slot allocation
//! - Persisted header (flags, bitmap, cursors)
//! - Append, indexed write and cancel against a backing store
//!
//! ## Slot Layout
//! ```text
//! ┌────────┬────────┬────────┬─────┬──────────────┐
//! │ slot 0 │ slot 1 │ slot 2 │ ... │ slot cap - 1 │
//! │reserved│ record │ record │     │   record     │
//! └────────┴────────┴────────┴─────┴──────────────┘
//! ```

mod bitmap;
mod handle;
mod header;

pub use bitmap::IndexBitmap;
pub use handle::{CancelOutcome, LogHandle, LogState};
pub use header::{LogHeader, HEADER_MAGIC, LOG_F_IS_CAT, LOG_F_IS_PLAIN, LOG_F_ZAP_WHEN_EMPTY};
