//! Catalog Module
//!
//! A catalog is a log whose records name other logs. Each live catalog slot
//! holds a LOGID record for one segment (a plain log of ordinary records).
//!
//! ## Responsibilities
//! - Own the open-segment cache and the current/next segment pointers
//! - Allocate catalog slots for new segments (append path)
//! - Reclaim slots of destroyed segments (cancel path)
//! - Walk every live record in write order or in reverse (scan path)
//!
//! ## Layout
//! ```text
//!  catalog:  [0: reserved][1: LOGID seg A][2: LOGID seg B][3: ...]
//!                              │               │
//!                              ▼               ▼
//!  seg A:    [0][1: rec][2: rec]...      seg B: [0][1: rec]...
//! ```
//!
//! ## Ring
//! `oldest_index` is the boundary slot: live slots lie strictly after it,
//! in ring order, up to `last_index`. Slot 0 is never used.

mod append;
mod cancel;
mod lock;
mod scan;

pub use cancel::CancelSummary;
pub use scan::{LogEntry, RecordProcessor, ReverseCursor, ScanControl, ScanCursor, ScanPosition, ScanSummary};

use std::sync::Arc;

use crate::config::Config;
use crate::error::{CatlogError, Result};
use crate::log::{LogHandle, LogHeader};
use crate::record::LogId;
use crate::store::{self, LogStore, Reservation};

use lock::{CatalogLock, CatalogState, Segment};

/// Point-in-time counters for one catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogStats {
    pub id: LogId,
    pub capacity: u32,
    pub oldest_index: u32,
    pub last_index: u32,
    /// Live range crosses slot 0
    pub wrapped: bool,
    /// Segments with a live catalog slot
    pub live_segments: usize,
    /// Segments in the open cache (includes declared ones)
    pub open_segments: usize,
    /// Live records across all segments
    pub live_records: u64,
    pub current_log: Option<LogId>,
    pub next_log: Option<LogId>,
}

/// A catalog of segments on a backing store
///
/// ## Concurrency Model
///
/// - **Appends**: take the catalog read lock to find the current segment,
///   then work under that segment's write lock only. Switching segments
///   and creating one take the catalog write lock.
///
/// - **Cancels**: hold the catalog write lock for a whole batch.
///
/// - **Scans**: snapshot one segment at a time under read locks; callbacks
///   run with no lock held, so they may append or cancel.
pub struct Catalog {
    /// Backing store shared with other catalogs
    store: Arc<dyn LogStore>,

    config: Config,

    id: LogId,

    /// Catalog state and the segment locks reachable through it
    lock: CatalogLock,
}

impl Catalog {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create a new, empty catalog on `store`
    pub fn create(store: Arc<dyn LogStore>, config: Config) -> Result<Self> {
        config.validate()?;

        let id = store.allocate_id()?;
        let header = LogHeader::catalog(config.catalog_capacity);
        let mut handle = LogHandle::declared(id, header.clone());

        store::transact(store.as_ref(), Reservation::create(), |txn| {
            handle.create(store.as_ref(), txn, header)
        })?;

        tracing::debug!(
            "Created catalog {} with {} slots",
            id,
            config.catalog_capacity
        );

        Ok(Self {
            store,
            config,
            id,
            lock: CatalogLock::new(CatalogState::new(handle)),
        })
    }

    /// Open an existing catalog
    ///
    /// On open:
    /// 1. Load and check the catalog header
    /// 2. Read its live LOGID records
    /// 3. Rebuild the slot → segment table
    ///
    /// Segments themselves are opened lazily.
    pub fn open(store: Arc<dyn LogStore>, id: LogId, config: Config) -> Result<Self> {
        config.validate()?;

        let header = store.open(id)?;
        if !header.is_catalog() {
            return Err(CatlogError::Corruption(format!(
                "log {} is not a catalog (flags {:#x})",
                id, header.flags
            )));
        }

        let handle = LogHandle::live(id, header);
        let mut state = CatalogState::new(handle);

        for record in state.log.live_records(store.as_ref(), 0)? {
            let segment = record.as_logid()?;
            state.slots.insert(record.index, segment);
        }

        let expected = state.log.header().bitmap.count() as usize;
        if state.slots.len() != expected {
            tracing::warn!(
                "Catalog {} has {} live slots but {} LOGID records",
                id,
                expected,
                state.slots.len()
            );
        }

        tracing::debug!(
            "Opened catalog {}: {} segments, oldest {}, last {}",
            id,
            state.slots.len(),
            state.log.header().oldest_index,
            state.log.last_index()
        );

        Ok(Self {
            store,
            config,
            id,
            lock: CatalogLock::new(state),
        })
    }

    /// Sync everything and drop the open-segment cache.
    ///
    /// Declared segments that were never created are forgotten.
    pub fn close(self) -> Result<()> {
        self.sync()?;

        let mut state = self.lock.write();
        let declared = state
            .open
            .values()
            .filter(|segment| !state.read_segment(segment).exists())
            .count();
        if declared > 0 {
            tracing::debug!(
                "Dropping {} uncreated segments of catalog {}",
                declared,
                self.id
            );
        }

        state.open.clear();
        state.current = None;
        state.next = None;

        tracing::debug!("Closed catalog {}", self.id);
        Ok(())
    }

    /// Force every open segment and the catalog to stable storage
    pub fn sync(&self) -> Result<()> {
        let state = self.lock.read();
        for segment in state.open.values() {
            let log = state.read_segment(segment);
            if log.exists() {
                self.store.sync(log.id())?;
            }
        }
        self.store.sync(self.id)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> LogId {
        self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    /// Slots in the catalog bitmap
    pub fn capacity(&self) -> u32 {
        self.lock.read().log.header().capacity()
    }

    pub fn last_index(&self) -> u32 {
        self.lock.read().log.last_index()
    }

    pub fn oldest_index(&self) -> u32 {
        self.lock.read().log.header().oldest_index
    }

    /// Segments with a live catalog slot
    pub fn segment_count(&self) -> usize {
        self.lock.read().slots.len()
    }

    /// Live (slot, segment) pairs in slot order
    pub fn segments(&self) -> Vec<(u32, LogId)> {
        self.lock
            .read()
            .slots
            .iter()
            .map(|(&slot, &id)| (slot, id))
            .collect()
    }

    pub fn current_log(&self) -> Option<LogId> {
        self.lock.read().current
    }

    pub fn next_log(&self) -> Option<LogId> {
        self.lock.read().next
    }

    /// Counters, opening every live segment to count its records
    pub fn stats(&self) -> Result<CatalogStats> {
        let mut state = self.lock.write();

        let mut live_records = 0u64;
        let slots: Vec<(u32, LogId)> = state.slots.iter().map(|(&s, &id)| (s, id)).collect();
        for (_, id) in slots {
            let segment = self.lookup(&mut state, id)?;
            live_records += state.read_segment(&segment).header().bitmap.count() as u64;
        }

        let header = state.log.header();
        Ok(CatalogStats {
            id: self.id,
            capacity: header.capacity(),
            oldest_index: header.oldest_index,
            last_index: header.last_index,
            wrapped: header.is_wrapped(),
            live_segments: state.slots.len(),
            open_segments: state.open.len(),
            live_records,
            current_log: state.current,
            next_log: state.next,
        })
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Check the catalog's bookkeeping end to end.
    ///
    /// Returns `Corruption` describing the first inconsistency found.
    pub fn verify(&self) -> Result<()> {
        let mut state = self.lock.write();
        let header = state.log.header().clone();
        let capacity = header.capacity();
        let oldest = header.oldest_index;
        let last = header.last_index;

        let corrupt = |msg: String| Err(CatlogError::Corruption(format!("catalog {}: {}", self.id, msg)));

        let live: Vec<u32> = header.bitmap.iter().collect();
        let mapped: Vec<u32> = state.slots.keys().copied().collect();
        if live != mapped {
            return corrupt(format!("bitmap slots {:?} != LOGID slots {:?}", live, mapped));
        }

        if live.len() > capacity as usize - 2 {
            return corrupt(format!("{} live slots exceed capacity {}", live.len(), capacity));
        }

        if live.is_empty() {
            if oldest != last {
                return corrupt(format!("empty but oldest {} != last {}", oldest, last));
            }
        } else {
            let span = ring_distance(oldest, last, capacity);
            for &slot in &live {
                let distance = ring_distance(oldest, slot, capacity);
                if distance == 0 || distance > span {
                    return corrupt(format!(
                        "slot {} outside live range ({}, {}]",
                        slot, oldest, last
                    ));
                }
            }
            let first = header.bitmap.successor(oldest);
            if !header.bitmap.contains(first) {
                return corrupt(format!("oldest {} is not followed by a live slot", oldest));
            }
        }

        let slots: Vec<(u32, LogId)> = state.slots.iter().map(|(&s, &id)| (s, id)).collect();
        for (slot, id) in slots {
            let segment = self.lookup(&mut state, id)?;
            let log = state.read_segment(&segment);
            let seg_header = log.header();

            if !log.exists() {
                return corrupt(format!("segment {} at slot {} does not exist", id, slot));
            }
            if !seg_header.is_plain() {
                return corrupt(format!("segment {} is not a plain log", id));
            }
            if seg_header.catalog_slot != slot || segment.catalog_slot() != slot {
                return corrupt(format!(
                    "segment {} points at slot {}, catalog has it at {}",
                    id, seg_header.catalog_slot, slot
                ));
            }
            if seg_header.bitmap.iter().any(|index| index == 0 || index > seg_header.last_index) {
                return corrupt(format!(
                    "segment {} has live slots beyond last index {}",
                    id, seg_header.last_index
                ));
            }
        }

        for pointer in [state.current, state.next].into_iter().flatten() {
            if !state.open.contains_key(&pointer) {
                return corrupt(format!("segment pointer {} is not open", pointer));
            }
        }

        Ok(())
    }

    // =========================================================================
    // Segment Lookup
    // =========================================================================

    /// Find `id` in the open cache, or open it from the store and cache it.
    ///
    /// Only segments this catalog holds a live slot for are opened from the
    /// store; any other log (another catalog's segment included) is
    /// `LogNotFound`.
    pub(crate) fn lookup(&self, state: &mut CatalogState, id: LogId) -> Result<Arc<Segment>> {
        if let Some(segment) = state.cached(id) {
            return Ok(segment);
        }

        if !state.slots.values().any(|&log| log == id) {
            tracing::debug!("Log {} has no slot in catalog {}", id, self.id);
            return Err(CatlogError::LogNotFound(id));
        }

        let header = self.store.open(id)?;
        if !header.is_plain() {
            return Err(CatlogError::Corruption(format!(
                "log {} in catalog {} is not a plain log",
                id, self.id
            )));
        }

        let segment = Segment::new(self.id, LogHandle::live(id, header));
        if state.slots.get(&segment.catalog_slot()) != Some(&id) {
            if let Some((&slot, _)) = state.slots.iter().rev().find(|(_, &log)| log == id) {
                tracing::warn!(
                    "Segment {} claims catalog slot {}, catalog {} has it at {}",
                    id,
                    segment.catalog_slot(),
                    self.id,
                    slot
                );
                segment.set_catalog_slot(slot);
            }
        }

        state.open.insert(id, Arc::clone(&segment));
        tracing::debug!(
            "Opened segment {} at catalog slot {}",
            id,
            segment.catalog_slot()
        );
        Ok(segment)
    }

    /// Declare a new segment: identity only, created on first write
    pub(crate) fn declare_log(&self, state: &mut CatalogState) -> Result<Arc<Segment>> {
        let id = self.store.allocate_id()?;
        let header = LogHeader::plain(self.config.segment_capacity, 0);
        let segment = Segment::new(self.id, LogHandle::declared(id, header));
        state.open.insert(id, Arc::clone(&segment));
        tracing::trace!("Declared segment {} for catalog {}", id, self.id);
        Ok(segment)
    }
}

/// Steps from `from` forward to `to` around a ring of `capacity` slots
pub(crate) fn ring_distance(from: u32, to: u32, capacity: u32) -> u32 {
    (to + capacity - from) % capacity
}
