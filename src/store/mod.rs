//! Store Module
//!
//! The backing-store capability the catalog is built on.
//!
//! ## Responsibilities
//! - Allocate identities for new log objects
//! - Create, destroy and open log objects
//! - Persist headers and append record frames
//! - Run transactions (begin → declare → start → stop)
//!
//! The catalog never manages durability itself: it decides what to write
//! and in which order, the store makes it stick.
//!
//! ## Implementations
//! - [`MemStore`]: process-local, with fault injection for tests
//! - [`FileStore`]: one header file and one record file per object

mod file;
mod memory;
mod txn;

pub use file::FileStore;
pub use memory::{FaultPoint, MemStore};
pub use txn::{Reservation, Transaction, TxnOp, TxnState};

use crate::error::Result;
use crate::log::LogHeader;
use crate::record::{LogId, LogRecord};

/// Object/transaction capability consumed by logs and catalogs.
///
/// Mutating calls take a started [`Transaction`] and charge it.
pub trait LogStore: Send + Sync {
    /// Pick an identity for a log that will be created later
    fn allocate_id(&self) -> Result<LogId>;

    /// True once `create` succeeded and until `destroy`
    fn exists(&self, id: LogId) -> Result<bool>;

    /// Load the header of an existing log (`LogNotFound` otherwise)
    fn open(&self, id: LogId) -> Result<LogHeader>;

    /// Materialize a log with its initial header (`AlreadyExists` if present)
    fn create(&self, id: LogId, header: &LogHeader, txn: &mut Transaction) -> Result<()>;

    /// Remove a log and all its records
    fn destroy(&self, id: LogId, txn: &mut Transaction) -> Result<()>;

    /// Replace the persisted header
    fn write_header(&self, id: LogId, header: &LogHeader, txn: &mut Transaction) -> Result<()>;

    /// Append a record frame (its index is already assigned)
    fn append(&self, id: LogId, record: &LogRecord, txn: &mut Transaction) -> Result<()>;

    /// Every record frame ever appended, in append order
    fn read_records(&self, id: LogId) -> Result<Vec<LogRecord>>;

    /// Force a log's writes to stable storage
    fn sync(&self, id: LogId) -> Result<()>;

    /// Begin a transaction in the declaring state
    fn begin(&self) -> Result<Transaction>;

    /// Start a declared transaction
    fn start(&self, txn: &mut Transaction) -> Result<()> {
        txn.start()
    }

    /// Commit or abort a transaction
    fn stop(&self, mut txn: Transaction, _commit: bool) -> Result<()> {
        txn.finish()
    }
}

/// Run `body` inside a transaction declared with `reservation`.
///
/// Commits when `body` succeeds and aborts otherwise.
pub fn transact<T>(
    store: &dyn LogStore,
    reservation: Reservation,
    body: impl FnOnce(&mut Transaction) -> Result<T>,
) -> Result<T> {
    let mut txn = store.begin()?;
    txn.declare(reservation)?;
    store.start(&mut txn)?;

    match body(&mut txn) {
        Ok(value) => {
            store.stop(txn, true)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(stop_err) = store.stop(txn, false) {
                tracing::warn!("Failed to abort transaction: {}", stop_err);
            }
            Err(e)
        }
    }
}
