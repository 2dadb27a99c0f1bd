//! Scan path
//!
//! Walks every live record of every live segment. Two orders:
//!
//! - **Forward** (write order): catalog slots from the oldest boundary to
//!   `last_index`, records in each segment by ascending index. Resumable
//!   from a [`ScanPosition`].
//! - **Reverse** (undo order): catalog slots from `last_index` back to the
//!   boundary, records in each segment by descending index.
//!
//! When the live range crosses slot 0 the catalog is walked as two ranges:
//!
//! ```text
//!   forward:  [oldest, capacity) then [0, last]
//!   reverse:  [0, last] descending then [oldest, capacity) descending
//! ```
//!
//! Cursors load one segment at a time under read locks and hand records out
//! with no lock held, so a processor may append or cancel while scanning.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use crate::error::Result;
use crate::record::{Cookie, LogId, LogRecord};

use super::{ring_distance, Catalog};

// =============================================================================
// Positions and Entries
// =============================================================================

/// Checkpoint inside a forward scan: a catalog slot and a record index in
/// the segment at that slot. Resuming continues strictly after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPosition {
    pub catalog_slot: u32,
    pub index: u32,
}

impl ScanPosition {
    pub fn new(catalog_slot: u32, index: u32) -> Self {
        Self {
            catalog_slot,
            index,
        }
    }
}

impl fmt::Display for ScanPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.catalog_slot, self.index)
    }
}

/// One live record handed out by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub position: ScanPosition,
    /// Cancels this record
    pub cookie: Cookie,
    pub record: LogRecord,
}

impl LogEntry {
    fn new(catalog_slot: u32, segment: LogId, record: LogRecord) -> Self {
        Self {
            position: ScanPosition::new(catalog_slot, record.index),
            cookie: Cookie::new(segment, record.index),
            record,
        }
    }
}

// =============================================================================
// Processors
// =============================================================================

/// What a processor wants after one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    /// End the scan early; not an error
    Stop,
}

/// Callback interface driven by [`Catalog::process`] and friends.
///
/// Returning an error aborts the scan and hands the error to the caller.
pub trait RecordProcessor {
    fn process(&mut self, entry: &LogEntry) -> Result<ScanControl>;

    /// Called once after a recovery scan, whatever its outcome
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<F> RecordProcessor for F
where
    F: FnMut(&LogEntry) -> Result<ScanControl>,
{
    fn process(&mut self, entry: &LogEntry) -> Result<ScanControl> {
        self(entry)
    }
}

/// Outcome of a callback scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Segments loaded
    pub segments: usize,
    /// Records handed to the processor
    pub records: usize,
    /// Processor asked to stop
    pub stopped: bool,
    /// Last record handed to the processor
    pub last: Option<ScanPosition>,
}

// =============================================================================
// Cursors
// =============================================================================

/// Lazy forward scan, checkpointable through [`ScanCursor::position`]
pub struct ScanCursor<'a> {
    catalog: &'a Catalog,
    segments: VecDeque<(u32, LogId)>,
    pending: VecDeque<LogEntry>,
    resume: Option<ScanPosition>,
    last: Option<ScanPosition>,
    visited: usize,
    done: bool,
}

impl ScanCursor<'_> {
    /// Last position handed out; pass it to `Catalog::scan` to resume
    pub fn position(&self) -> Option<ScanPosition> {
        self.last
    }

    pub fn segments_visited(&self) -> usize {
        self.visited
    }
}

impl Iterator for ScanCursor<'_> {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Result<LogEntry>> {
        loop {
            if self.done {
                return None;
            }
            if let Some(entry) = self.pending.pop_front() {
                self.last = Some(entry.position);
                return Some(Ok(entry));
            }

            let Some((slot, id)) = self.segments.pop_front() else {
                self.done = true;
                return None;
            };

            let after = match self.resume {
                Some(position) if position.catalog_slot == slot => position.index,
                _ => 0,
            };

            match self.catalog.segment_records(slot, id) {
                Ok(Some(records)) => {
                    self.visited += 1;
                    self.pending.extend(
                        records
                            .into_iter()
                            .filter(|record| record.index > after)
                            .map(|record| LogEntry::new(slot, id, record)),
                    );
                }
                Ok(None) => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Lazy reverse scan
pub struct ReverseCursor<'a> {
    catalog: &'a Catalog,
    segments: VecDeque<(u32, LogId)>,
    pending: VecDeque<LogEntry>,
    visited: usize,
    done: bool,
}

impl ReverseCursor<'_> {
    pub fn segments_visited(&self) -> usize {
        self.visited
    }
}

impl Iterator for ReverseCursor<'_> {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Result<LogEntry>> {
        loop {
            if self.done {
                return None;
            }
            if let Some(entry) = self.pending.pop_front() {
                return Some(Ok(entry));
            }

            let Some((slot, id)) = self.segments.pop_front() else {
                self.done = true;
                return None;
            };

            match self.catalog.segment_records(slot, id) {
                Ok(Some(records)) => {
                    self.visited += 1;
                    self.pending.extend(
                        records
                            .into_iter()
                            .rev()
                            .map(|record| LogEntry::new(slot, id, record)),
                    );
                }
                Ok(None) => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

// =============================================================================
// Slot Ranges
// =============================================================================

/// Live segments in write order
fn forward_slots(slots: &BTreeMap<u32, LogId>, oldest: u32, last: u32, capacity: u32) -> Vec<(u32, LogId)> {
    let pairs = |(&slot, &id): (&u32, &LogId)| (slot, id);
    if oldest > last {
        slots
            .range(oldest..capacity)
            .chain(slots.range(0..=last))
            .map(pairs)
            .collect()
    } else {
        slots.range(oldest..=last).map(pairs).collect()
    }
}

/// Live segments newest first
fn reverse_slots(slots: &BTreeMap<u32, LogId>, oldest: u32, last: u32, capacity: u32) -> Vec<(u32, LogId)> {
    let pairs = |(&slot, &id): (&u32, &LogId)| (slot, id);
    if oldest > last {
        slots
            .range(0..=last)
            .rev()
            .chain(slots.range(oldest..capacity).rev())
            .map(pairs)
            .collect()
    } else {
        slots.range(oldest..=last).rev().map(pairs).collect()
    }
}

// =============================================================================
// Catalog Entry Points
// =============================================================================

impl Catalog {
    /// Forward cursor, starting strictly after `start` when given.
    ///
    /// A `start` whose slot is no longer in the live range was reclaimed
    /// already; the scan then covers everything still live.
    pub fn scan(&self, start: Option<ScanPosition>) -> ScanCursor<'_> {
        let state = self.lock.read();
        let header = state.log.header();
        let (oldest, last, capacity) = (header.oldest_index, header.last_index, header.capacity());

        if header.is_wrapped() {
            tracing::warn!("Catalog {} crosses index zero", self.id);
        }

        let mut segments = forward_slots(&state.slots, oldest, last, capacity);
        let mut resume = start;

        if let Some(position) = start {
            let span = ring_distance(oldest, last, capacity);
            let from = ring_distance(oldest, position.catalog_slot, capacity);
            if from == 0 || from > span {
                tracing::debug!(
                    "Resume slot {} of catalog {} already reclaimed, scanning all",
                    position.catalog_slot,
                    self.id
                );
                resume = None;
            } else {
                segments.retain(|&(slot, _)| ring_distance(oldest, slot, capacity) >= from);
            }
        }

        ScanCursor {
            catalog: self,
            segments: segments.into(),
            pending: VecDeque::new(),
            resume,
            last: start,
            visited: 0,
            done: false,
        }
    }

    /// Reverse cursor over every live record
    pub fn scan_reverse(&self) -> ReverseCursor<'_> {
        let state = self.lock.read();
        let header = state.log.header();

        if header.is_wrapped() {
            tracing::warn!("Catalog {} crosses index zero", self.id);
        }

        let segments = reverse_slots(
            &state.slots,
            header.oldest_index,
            header.last_index,
            header.capacity(),
        );

        ReverseCursor {
            catalog: self,
            segments: segments.into(),
            pending: VecDeque::new(),
            visited: 0,
            done: false,
        }
    }

    /// Forward scan feeding `processor`, resuming after `start` when given
    pub fn process<P>(&self, start: Option<ScanPosition>, processor: &mut P) -> Result<ScanSummary>
    where
        P: RecordProcessor + ?Sized,
    {
        let mut cursor = self.scan(start);
        let mut summary = self.drive(&mut cursor, processor)?;
        summary.segments = cursor.segments_visited();
        Ok(summary)
    }

    /// Reverse scan feeding `processor`
    pub fn reverse_process<P>(&self, processor: &mut P) -> Result<ScanSummary>
    where
        P: RecordProcessor + ?Sized,
    {
        let mut cursor = self.scan_reverse();
        let mut summary = self.drive(&mut cursor, processor)?;
        summary.segments = cursor.segments_visited();
        Ok(summary)
    }

    /// Full forward replay for crash recovery.
    ///
    /// Runs the scan, then `processor.finish()` whatever the outcome, then
    /// syncs the catalog. The first error of the three is returned.
    pub fn recover<P>(&self, processor: &mut P) -> Result<ScanSummary>
    where
        P: RecordProcessor + ?Sized,
    {
        let scanned = self.process(None, processor);
        match &scanned {
            Ok(summary) => tracing::debug!(
                "Recovered catalog {}: {} records in {} segments{}",
                self.id,
                summary.records,
                summary.segments,
                if summary.stopped { " (stopped)" } else { "" }
            ),
            Err(e) => tracing::error!("Recovery scan of catalog {} failed: {}", self.id, e),
        }

        let finished = processor.finish();
        let synced = self.sync();

        let summary = scanned?;
        finished?;
        synced?;
        Ok(summary)
    }

    fn drive<I, P>(&self, entries: &mut I, processor: &mut P) -> Result<ScanSummary>
    where
        I: Iterator<Item = Result<LogEntry>>,
        P: RecordProcessor + ?Sized,
    {
        let mut summary = ScanSummary::default();
        for entry in entries {
            let entry = entry?;
            summary.records += 1;
            summary.last = Some(entry.position);

            match processor.process(&entry) {
                Ok(ScanControl::Continue) => {}
                Ok(ScanControl::Stop) => {
                    summary.stopped = true;
                    break;
                }
                Err(e) => {
                    tracing::debug!(
                        "Scan of catalog {} aborted at {}: {}",
                        self.id,
                        entry.position,
                        e
                    );
                    return Err(e);
                }
            }
        }
        Ok(summary)
    }

    /// Live records of the segment at `slot`, or None if the slot no longer
    /// names `id`
    fn segment_records(&self, slot: u32, id: LogId) -> Result<Option<Vec<LogRecord>>> {
        {
            let state = self.lock.read();
            if state.slots.get(&slot) != Some(&id) {
                return Ok(None);
            }
            if let Some(segment) = state.cached(id) {
                let log = state.read_segment(&segment);
                return log.live_records(self.store.as_ref(), 0).map(Some);
            }
        }

        let mut state = self.lock.write();
        if state.slots.get(&slot) != Some(&id) {
            return Ok(None);
        }
        let segment = self.lookup(&mut state, id)?;
        let log = state.read_segment(&segment);
        log.live_records(self.store.as_ref(), 0).map(Some)
    }
}
