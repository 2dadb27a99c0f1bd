//! Append path
//!
//! Two phases:
//! 1. `declare_add`: before the transaction starts, reserve what the write
//!    may need (creating the current and next segments, their LOGID records
//!    in the catalog, and the record itself in either of them)
//! 2. `add_rec`: inside the started transaction, pick the current segment,
//!    create it if it only exists as a declaration, and write the record
//!
//! ```text
//!   current_segment()                 ensure_created()
//!   ┌─────────────────────┐           ┌──────────────────────────────┐
//!   │ cat read → seg write│──room?──▶ │ seg unlock → cat write →     │
//!   │ cat write → recheck │           │ seg write → create + LOGID   │
//!   │ promote next        │           └──────────────────────────────┘
//!   └─────────────────────┘
//! ```

use std::sync::Arc;

use crate::error::{CatlogError, Result};
use crate::log::{LogHandle, LogHeader, LogState};
use crate::record::{Cookie, LogRecord, LOGID_PAYLOAD_SIZE, RECORD_HEADER_SIZE, RECORD_TAIL_SIZE};
use crate::store::{LogStore, Reservation, Transaction};

use super::lock::{CatalogState, Segment, SegmentWrite};
use super::Catalog;

/// Encoded size of a LOGID record
const LOGID_RECORD_SIZE: usize = RECORD_HEADER_SIZE + LOGID_PAYLOAD_SIZE + RECORD_TAIL_SIZE;

impl Catalog {
    // =========================================================================
    // Declare Phase
    // =========================================================================

    /// Reserve transaction resources for appending `record`.
    ///
    /// Declares the current and next segments if they are not known yet.
    pub fn declare_add(&self, record: &LogRecord, txn: &mut Transaction) -> Result<()> {
        self.check_chunk(record);

        let (current, next) = {
            let state = self.lock.read();
            (state.current_segment(), state.next.and_then(|id| state.open.get(&id).cloned()))
        };

        let (current, next) = match (current, next) {
            (Some(current), Some(next)) => (current, next),
            _ => {
                let mut state = self.lock.write();
                let current = match state.current_segment() {
                    Some(segment) => segment,
                    None => {
                        let segment = self.declare_log(&mut state)?;
                        state.current = Some(segment.id());
                        segment
                    }
                };
                let next = match state.next.and_then(|id| state.open.get(&id).cloned()) {
                    Some(segment) => segment,
                    None => {
                        let segment = self.declare_log(&mut state)?;
                        state.next = Some(segment.id());
                        segment
                    }
                };
                (current, next)
            }
        };

        let mut reservation = Reservation::default();
        {
            let state = self.lock.read();
            for segment in [&current, &next] {
                let log = state.read_segment(segment);
                reservation += Self::reservation_for(&log, record.encoded_len());
            }
        }

        tracing::trace!(
            "Declared append of {} bytes: current {}, next {}",
            record.encoded_len(),
            current.id(),
            next.id()
        );
        txn.declare(reservation)
    }

    /// What writing `len` bytes into `log` may cost
    fn reservation_for(log: &LogHandle, len: usize) -> Reservation {
        let mut reservation = Reservation::default();
        if !log.exists() {
            reservation += Reservation::create();
            reservation += Reservation::record(LOGID_RECORD_SIZE);
        }
        reservation += Reservation::record(len);
        reservation
    }

    // =========================================================================
    // Execute Phase
    // =========================================================================

    /// Append `record` inside the started transaction `txn`.
    ///
    /// Returns the cookie that cancels it. A segment that fills up between
    /// selection and write is retried once against the next segment.
    ///
    /// # Panics
    /// If the encoded record is larger than the configured chunk size.
    pub fn add_rec(&self, record: &LogRecord, txn: &mut Transaction) -> Result<Cookie> {
        self.check_chunk(record);

        let log = self.current_segment()?;
        match self.write_record(log, record, txn) {
            Err(CatlogError::LogFull { log }) => {
                tracing::trace!("Segment {} filled concurrently, retrying", log);
                let log = self.current_segment()?;
                self.write_record(log, record, txn)
            }
            result => result,
        }
    }

    /// Declare, start, append and commit in one call
    pub fn add(&self, record: &LogRecord) -> Result<Cookie> {
        let store = self.store.as_ref();
        let mut txn = store.begin()?;
        self.declare_add(record, &mut txn)?;
        store.start(&mut txn)?;

        match self.add_rec(record, &mut txn) {
            Ok(cookie) => {
                store.stop(txn, true)?;
                Ok(cookie)
            }
            Err(e) => {
                tracing::error!("Append to catalog {} failed: {}", self.id, e);
                if let Err(stop_err) = store.stop(txn, false) {
                    tracing::warn!("Failed to abort append transaction: {}", stop_err);
                }
                Err(e)
            }
        }
    }

    /// `InvalidRecord` if `record` does not fit in one chunk.
    ///
    /// Callers holding untrusted payloads check here first; `add` and
    /// `add_rec` treat an oversized record as a programming error.
    pub fn check_record(&self, record: &LogRecord) -> Result<()> {
        if record.encoded_len() > self.config.chunk_size {
            return Err(CatlogError::InvalidRecord(format!(
                "record of {} bytes exceeds chunk size {}",
                record.encoded_len(),
                self.config.chunk_size
            )));
        }
        Ok(())
    }

    fn check_chunk(&self, record: &LogRecord) {
        if let Err(e) = self.check_record(record) {
            panic!("{}", e);
        }
    }

    fn write_record(&self, log: SegmentWrite, record: &LogRecord, txn: &mut Transaction) -> Result<Cookie> {
        let mut log = if log.exists() {
            log
        } else {
            self.ensure_created(log, txn)?
        };

        let index = log.append(self.store.as_ref(), txn, record)?;
        tracing::trace!("Appended record {} to segment {}", index, log.id());
        Ok(Cookie::new(log.id(), index))
    }

    // =========================================================================
    // Segment Selection
    // =========================================================================

    /// Write-locked segment that has room or has not been created yet.
    ///
    /// Checks under the catalog read lock first, then rechecks under the
    /// write lock and promotes the next segment.
    pub(crate) fn current_segment(&self) -> Result<SegmentWrite> {
        {
            let state = self.lock.read();
            if let Some(segment) = state.current_segment() {
                let log = state.lock_segment(&segment);
                if log.has_room() {
                    return Ok(log);
                }
            }
        }

        let mut state = self.lock.write();
        if let Some(segment) = state.current_segment() {
            let log = state.lock_segment(&segment);
            if log.has_room() {
                return Ok(log);
            }
        }

        let next = match state.next.take().and_then(|id| state.open.get(&id).cloned()) {
            Some(segment) => segment,
            None => self.declare_log(&mut state)?,
        };

        if let Some(old) = state.current.replace(next.id()) {
            tracing::debug!(
                "Catalog {} switched current segment {} -> {}",
                self.id,
                old,
                next.id()
            );
        }
        Ok(state.lock_segment(&next))
    }

    /// Create a declared segment, taking locks in catalog → segment order
    fn ensure_created(&self, log: SegmentWrite, txn: &mut Transaction) -> Result<SegmentWrite> {
        let segment = Arc::clone(log.segment());
        drop(log);

        let mut state = self.lock.write();
        let mut log = state.lock_segment(&segment);
        if log.state() == LogState::Declared {
            self.new_log(&mut state, &segment, &mut log, txn)?;
        }
        Ok(log)
    }

    /// Materialize `log` and record it in a fresh catalog slot.
    ///
    /// Fails with `CatalogFull` before touching the store when no slot is
    /// free. A segment created but not recorded is destroyed again.
    fn new_log(
        &self,
        state: &mut CatalogState,
        segment: &Arc<Segment>,
        log: &mut LogHandle,
        txn: &mut Transaction,
    ) -> Result<()> {
        let store: &dyn LogStore = self.store.as_ref();
        let header = state.log.header();
        let capacity = header.capacity();

        let slot = header
            .bitmap
            .next_free(header.last_index, header.oldest_index)
            .ok_or(CatlogError::CatalogFull { capacity })?;

        let plain = LogHeader::plain(self.config.segment_capacity, slot);
        if let Err(e) = log.create(store, txn, plain) {
            tracing::error!("Failed to create segment {}: {}", log.id(), e);
            return Err(e);
        }

        if let Err(e) = state.log.write_at(store, txn, slot, &LogRecord::logid(log.id())) {
            tracing::error!(
                "Failed to record segment {} at catalog slot {}: {}",
                log.id(),
                slot,
                e
            );
            if let Err(destroy_err) = log.destroy(store, txn) {
                tracing::error!("Failed to destroy segment {}: {}", log.id(), destroy_err);
            }
            state.open.remove(&log.id());
            if state.current == Some(log.id()) {
                state.current = None;
            }
            if state.next == Some(log.id()) {
                state.next = None;
            }
            return Err(e);
        }

        state.slots.insert(slot, log.id());
        segment.set_catalog_slot(slot);

        tracing::debug!(
            "New segment {} at slot {} of catalog {}",
            log.id(),
            slot,
            self.id
        );
        Ok(())
    }
}
