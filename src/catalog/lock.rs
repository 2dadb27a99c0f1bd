//! Catalog lock hierarchy
//!
//! Two levels: the catalog state behind one `RwLock`, and every segment
//! behind its own. A segment lock can only be taken through a
//! [`CatalogRead`] or [`CatalogWrite`] guard, so the catalog lock is
//! always acquired first. The segment guards returned own their segment
//! (`Arc`), so the catalog guard can be dropped while the segment stays
//! locked.
//!
//! ```text
//!   CatalogLock ──read()/write()──▶ CatalogRead / CatalogWrite
//!                                          │
//!                          lock_segment() / read_segment()
//!                                          ▼
//!                                SegmentWrite / SegmentRead
//! ```

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::log::LogHandle;
use crate::record::{Cookie, LogId};

// =============================================================================
// Segments
// =============================================================================

/// A plain log owned by a catalog's open-segment cache
pub(crate) struct Segment {
    id: LogId,
    /// Owning catalog
    catalog: LogId,
    /// Slot of this segment's LOGID record in the catalog (0 until created)
    catalog_slot: AtomicU32,
    log: Arc<RwLock<LogHandle>>,
}

impl Segment {
    pub(crate) fn new(catalog: LogId, handle: LogHandle) -> Arc<Self> {
        Arc::new(Self {
            id: handle.id(),
            catalog,
            catalog_slot: AtomicU32::new(handle.header().catalog_slot),
            log: Arc::new(RwLock::new(handle)),
        })
    }

    pub(crate) fn id(&self) -> LogId {
        self.id
    }

    pub(crate) fn catalog_slot(&self) -> u32 {
        self.catalog_slot.load(Ordering::Acquire)
    }

    pub(crate) fn set_catalog_slot(&self, slot: u32) {
        self.catalog_slot.store(slot, Ordering::Release);
    }

    /// Cookie addressing this segment's own record in the catalog
    pub(crate) fn catalog_cookie(&self) -> Cookie {
        Cookie::new(self.catalog, self.catalog_slot())
    }
}

// =============================================================================
// Catalog State
// =============================================================================

/// Everything guarded by the catalog lock
pub(crate) struct CatalogState {
    /// The catalog's own log (bitmap of segment slots, cursors)
    pub(crate) log: LogHandle,

    /// Live catalog slot → segment it names
    pub(crate) slots: BTreeMap<u32, LogId>,

    /// Writable segment
    pub(crate) current: Option<LogId>,

    /// Pre-opened lookahead segment
    pub(crate) next: Option<LogId>,

    /// Open segments, ordered by (oid, generation)
    pub(crate) open: BTreeMap<LogId, Arc<Segment>>,
}

impl CatalogState {
    pub(crate) fn new(log: LogHandle) -> Self {
        Self {
            log,
            slots: BTreeMap::new(),
            current: None,
            next: None,
            open: BTreeMap::new(),
        }
    }

    /// Cached segment with exactly this id.
    ///
    /// Entries with the same oid but another generation are logged and
    /// skipped.
    pub(crate) fn cached(&self, id: LogId) -> Option<Arc<Segment>> {
        let range = LogId::new(id.oid, 0)..=LogId::new(id.oid, u32::MAX);
        for (cached_id, segment) in self.open.range(range) {
            if cached_id.generation != id.generation {
                tracing::warn!(
                    "Log {:#x} generation {:#x} != {:#x}",
                    id.oid,
                    cached_id.generation,
                    id.generation
                );
                continue;
            }
            return Some(Arc::clone(segment));
        }
        None
    }

    pub(crate) fn current_segment(&self) -> Option<Arc<Segment>> {
        self.current.and_then(|id| self.open.get(&id).cloned())
    }
}

/// The catalog-level lock
pub(crate) struct CatalogLock {
    state: RwLock<CatalogState>,
}

impl CatalogLock {
    pub(crate) fn new(state: CatalogState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub(crate) fn read(&self) -> CatalogRead<'_> {
        CatalogRead {
            guard: self.state.read(),
        }
    }

    pub(crate) fn write(&self) -> CatalogWrite<'_> {
        CatalogWrite {
            guard: self.state.write(),
        }
    }
}

// =============================================================================
// Catalog Guards
// =============================================================================

/// Shared hold on the catalog
pub(crate) struct CatalogRead<'a> {
    guard: RwLockReadGuard<'a, CatalogState>,
}

impl CatalogRead<'_> {
    pub(crate) fn lock_segment(&self, segment: &Arc<Segment>) -> SegmentWrite {
        SegmentWrite::acquire(segment)
    }

    pub(crate) fn read_segment(&self, segment: &Arc<Segment>) -> SegmentRead {
        SegmentRead::acquire(segment)
    }
}

impl Deref for CatalogRead<'_> {
    type Target = CatalogState;

    fn deref(&self) -> &CatalogState {
        &self.guard
    }
}

/// Exclusive hold on the catalog
pub(crate) struct CatalogWrite<'a> {
    guard: RwLockWriteGuard<'a, CatalogState>,
}

impl CatalogWrite<'_> {
    pub(crate) fn lock_segment(&self, segment: &Arc<Segment>) -> SegmentWrite {
        SegmentWrite::acquire(segment)
    }

    pub(crate) fn read_segment(&self, segment: &Arc<Segment>) -> SegmentRead {
        SegmentRead::acquire(segment)
    }
}

impl Deref for CatalogWrite<'_> {
    type Target = CatalogState;

    fn deref(&self) -> &CatalogState {
        &self.guard
    }
}

impl DerefMut for CatalogWrite<'_> {
    fn deref_mut(&mut self) -> &mut CatalogState {
        &mut self.guard
    }
}

// =============================================================================
// Segment Guards
// =============================================================================

/// Exclusive hold on one segment
pub(crate) struct SegmentWrite {
    segment: Arc<Segment>,
    guard: ArcRwLockWriteGuard<RawRwLock, LogHandle>,
}

impl SegmentWrite {
    fn acquire(segment: &Arc<Segment>) -> Self {
        Self {
            segment: Arc::clone(segment),
            guard: segment.log.write_arc(),
        }
    }

    pub(crate) fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }
}

impl Deref for SegmentWrite {
    type Target = LogHandle;

    fn deref(&self) -> &LogHandle {
        &self.guard
    }
}

impl DerefMut for SegmentWrite {
    fn deref_mut(&mut self) -> &mut LogHandle {
        &mut self.guard
    }
}

/// Shared hold on one segment
pub(crate) struct SegmentRead {
    guard: ArcRwLockReadGuard<RawRwLock, LogHandle>,
}

impl SegmentRead {
    fn acquire(segment: &Arc<Segment>) -> Self {
        Self {
            guard: segment.log.read_arc(),
        }
    }
}

impl Deref for SegmentRead {
    type Target = LogHandle;

    fn deref(&self) -> &LogHandle {
        &self.guard
    }
}
