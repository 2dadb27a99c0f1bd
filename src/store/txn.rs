//! Transactions
//!
//! Every mutation of the backing store happens inside a [`Transaction`].
//! Callers declare the resources they might use before starting it; stores
//! charge what was actually used as they go.

use std::collections::BTreeSet;
use std::ops::AddAssign;

use crate::error::{CatlogError, Result};
use crate::record::LogId;

/// Resource estimate for one transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reservation {
    /// Log objects created
    pub creates: u32,
    /// Log objects destroyed
    pub destroys: u32,
    /// Records appended
    pub records: u32,
    /// Header rewrites
    pub header_writes: u32,
    /// Record bytes appended
    pub bytes: u64,
}

impl Reservation {
    /// Creating one log (its initial header is written with it)
    pub fn create() -> Self {
        Self {
            creates: 1,
            ..Self::default()
        }
    }

    /// Appending one record of `len` bytes and rewriting the header
    pub fn record(len: usize) -> Self {
        Self {
            records: 1,
            header_writes: 1,
            bytes: len as u64,
            ..Self::default()
        }
    }

    /// Cancelling one record, possibly destroying its log and cancelling
    /// the log's slot in the catalog
    pub fn cancel() -> Self {
        Self {
            destroys: 1,
            header_writes: 2,
            ..Self::default()
        }
    }

    /// True when every counter is within `budget`
    pub fn fits_within(&self, budget: &Reservation) -> bool {
        self.creates <= budget.creates
            && self.destroys <= budget.destroys
            && self.records <= budget.records
            && self.header_writes <= budget.header_writes
            && self.bytes <= budget.bytes
    }
}

impl AddAssign for Reservation {
    fn add_assign(&mut self, other: Self) {
        self.creates += other.creates;
        self.destroys += other.destroys;
        self.records += other.records;
        self.header_writes += other.header_writes;
        self.bytes += other.bytes;
    }
}

/// Lifecycle of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting declarations
    Declaring,
    /// Accepting store operations
    Started,
    /// Committed or aborted
    Stopped,
}

/// Kind of store operation charged to a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOp {
    Create,
    Destroy,
    Append { bytes: usize },
    WriteHeader,
}

/// A unit of work against the backing store
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    state: TxnState,
    declared: Reservation,
    used: Reservation,
    touched: BTreeSet<LogId>,
}

impl Transaction {
    /// Fresh transaction in the declaring state
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: TxnState::Declaring,
            declared: Reservation::default(),
            used: Reservation::default(),
            touched: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.state == TxnState::Started
    }

    /// Add to the resource estimate (before `start`)
    pub fn declare(&mut self, reservation: Reservation) -> Result<()> {
        if self.state != TxnState::Declaring {
            return Err(CatlogError::Transaction(format!(
                "txn {} cannot declare in state {:?}",
                self.id, self.state
            )));
        }
        self.declared += reservation;
        Ok(())
    }

    pub fn declared(&self) -> Reservation {
        self.declared
    }

    pub fn used(&self) -> Reservation {
        self.used
    }

    /// Objects written by this transaction
    pub fn touched(&self) -> impl Iterator<Item = LogId> + '_ {
        self.touched.iter().copied()
    }

    /// Move to the started state
    pub fn start(&mut self) -> Result<()> {
        if self.state != TxnState::Declaring {
            return Err(CatlogError::Transaction(format!(
                "txn {} cannot start in state {:?}",
                self.id, self.state
            )));
        }
        self.state = TxnState::Started;
        Ok(())
    }

    /// Record one store operation against `log`. Fails unless started.
    pub fn charge(&mut self, op: TxnOp, log: LogId) -> Result<()> {
        if self.state != TxnState::Started {
            return Err(CatlogError::Transaction(format!(
                "txn {} not started ({:?}) for {:?} on {}",
                self.id, self.state, op, log
            )));
        }

        match op {
            TxnOp::Create => self.used.creates += 1,
            TxnOp::Destroy => self.used.destroys += 1,
            TxnOp::Append { bytes } => {
                self.used.records += 1;
                self.used.bytes += bytes as u64;
            }
            TxnOp::WriteHeader => self.used.header_writes += 1,
        }
        self.touched.insert(log);
        Ok(())
    }

    /// Move to the stopped state
    pub fn finish(&mut self) -> Result<()> {
        if self.state == TxnState::Stopped {
            return Err(CatlogError::Transaction(format!(
                "txn {} already stopped",
                self.id
            )));
        }
        self.state = TxnState::Stopped;
        Ok(())
    }
}
