//! Log Handle
//!
//! In-memory state of one log object (segment or catalog) and the
//! operations that keep its header and the store in step.
//!
//! ## Lifecycle
//! ```text
//!   declared ──create──▶ live ──last record cancelled──▶ destroyed
//!   (id only)                    (zap-when-empty logs)
//! ```

use crate::error::{CatlogError, Result};
use crate::record::{LogId, LogRecord};
use crate::store::{LogStore, Transaction};

use super::LogHeader;

/// Where a handle is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogState {
    /// Identity allocated, object not yet created on the store
    Declared,
    /// Object exists on the store
    Live,
    /// Object removed from the store
    Destroyed,
}

/// Result of cancelling one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Bit cleared, log still holds live records
    Cancelled,
    /// Bit cleared and the now-empty log was destroyed
    Destroyed,
}

/// Open handle on one log
#[derive(Debug)]
pub struct LogHandle {
    id: LogId,
    state: LogState,
    header: LogHeader,
}

impl LogHandle {
    /// Handle for a log that will be created on first write
    pub fn declared(id: LogId, header: LogHeader) -> Self {
        Self {
            id,
            state: LogState::Declared,
            header,
        }
    }

    /// Handle for a log loaded from the store
    pub fn live(id: LogId, header: LogHeader) -> Self {
        Self {
            id,
            state: LogState::Live,
            header,
        }
    }

    pub fn id(&self) -> LogId {
        self.id
    }

    pub fn state(&self) -> LogState {
        self.state
    }

    pub fn exists(&self) -> bool {
        self.state == LogState::Live
    }

    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    pub fn last_index(&self) -> u32 {
        self.header.last_index
    }

    /// Not destroyed, and another record fits after `last_index`
    pub fn has_room(&self) -> bool {
        self.state != LogState::Destroyed && self.header.has_room()
    }

    /// Create the object with `header` as its initial header
    pub fn create(&mut self, store: &dyn LogStore, txn: &mut Transaction, header: LogHeader) -> Result<()> {
        if self.state != LogState::Declared {
            return Err(CatlogError::AlreadyExists(self.id));
        }
        store.create(self.id, &header, txn)?;
        self.header = header;
        self.state = LogState::Live;
        Ok(())
    }

    /// Remove the object from the store
    pub fn destroy(&mut self, store: &dyn LogStore, txn: &mut Transaction) -> Result<()> {
        if self.state != LogState::Live {
            return Err(CatlogError::LogNotFound(self.id));
        }
        store.destroy(self.id, txn)?;
        self.state = LogState::Destroyed;
        Ok(())
    }

    /// Append `record` at the slot after `last_index`
    pub fn append(&mut self, store: &dyn LogStore, txn: &mut Transaction, record: &LogRecord) -> Result<u32> {
        if !self.has_room() {
            return Err(CatlogError::LogFull { log: self.id });
        }
        let index = self.header.last_index + 1;
        self.write_at(store, txn, index, record)?;
        Ok(index)
    }

    /// Write `record` at `index`, mark it live and persist the header.
    ///
    /// On failure the header is left as it was.
    ///
    /// # Panics
    /// If `index` is already live.
    pub fn write_at(
        &mut self,
        store: &dyn LogStore,
        txn: &mut Transaction,
        index: u32,
        record: &LogRecord,
    ) -> Result<()> {
        if !self.exists() {
            return Err(CatlogError::LogNotFound(self.id));
        }
        if index == 0 || index >= self.header.capacity() {
            return Err(CatlogError::InvalidIndex { log: self.id, index });
        }
        if self.header.bitmap.contains(index) {
            panic!("index {} already set in log bitmap of {}", index, self.id);
        }

        store.append(self.id, &record.with_index(index), txn)?;

        let prev_last = self.header.last_index;
        self.header.bitmap.insert(index);
        self.header.last_index = index;

        if let Err(e) = store.write_header(self.id, &self.header, txn) {
            self.header.bitmap.remove(index);
            self.header.last_index = prev_last;
            return Err(e);
        }

        tracing::trace!("Wrote record at index {} of log {}", index, self.id);
        Ok(())
    }

    /// Clear `index`; destroys the log if it empties and is zap-when-empty.
    ///
    /// Catalogs also move their oldest-slot boundary forward.
    pub fn cancel(&mut self, store: &dyn LogStore, txn: &mut Transaction, index: u32) -> Result<CancelOutcome> {
        if !self.exists() {
            return Err(CatlogError::LogNotFound(self.id));
        }
        if index == 0 || index >= self.header.capacity() {
            return Err(CatlogError::InvalidIndex { log: self.id, index });
        }
        if !self.header.bitmap.remove(index) {
            return Err(CatlogError::RecordNotFound { log: self.id, index });
        }

        let prev_oldest = self.header.oldest_index;
        if self.header.is_catalog() {
            self.header.oldest_index = self.header.bitmap.advance_oldest(
                self.header.oldest_index,
                index,
                self.header.last_index,
            );
        }

        let result = if self.header.bitmap.is_empty() && self.header.zap_when_empty() {
            store.destroy(self.id, txn).map(|_| CancelOutcome::Destroyed)
        } else {
            store
                .write_header(self.id, &self.header, txn)
                .map(|_| CancelOutcome::Cancelled)
        };

        match result {
            Ok(CancelOutcome::Destroyed) => {
                tracing::debug!("Log {} emptied and destroyed", self.id);
                self.state = LogState::Destroyed;
                Ok(CancelOutcome::Destroyed)
            }
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.header.bitmap.insert(index);
                self.header.oldest_index = prev_oldest;
                Err(e)
            }
        }
    }

    /// Live records with index above `after`, in index order
    pub fn live_records(&self, store: &dyn LogStore, after: u32) -> Result<Vec<LogRecord>> {
        if !self.exists() {
            return Ok(Vec::new());
        }

        let mut records: Vec<LogRecord> = store
            .read_records(self.id)?
            .into_iter()
            .filter(|r| r.index > after && self.header.bitmap.contains(r.index))
            .collect();

        // a slot reused after wraparound keeps only its newest frame
        records.reverse();
        let mut seen = std::collections::HashSet::new();
        records.retain(|r| seen.insert(r.index));
        records.sort_by_key(|r| r.index);
        Ok(records)
    }
}
