//! Index Bitmap
//!
//! Fixed-capacity occupancy bitmap with circular slot allocation.
//!
//! Slot 0 is a reserved sentinel and is never handed out. A catalog keeps
//! two cursors over its bitmap:
//! - `last_index`: the slot most recently allocated
//! - `oldest_index`: the boundary slot; live slots lie strictly after it
//!   in ring order, up to and including `last_index`
//!
//! ```text
//!   capacity = 8, oldest = 5, last = 2 (wrapped)
//!
//!   slot:   0   1   2   3   4   5   6   7
//!          [R] [x] [x] [ ] [ ] [ ] [x] [x]
//!               ^   ^           ^
//!               |   last        oldest
//!   ring order of live slots: 6, 7, 1, 2
//! ```

use serde::{Deserialize, Serialize};

const WORD_BITS: u32 = 64;

/// Occupancy bitmap: a bit is set iff the slot holds a live record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBitmap {
    capacity: u32,
    count: u32,
    words: Vec<u64>,
}

impl IndexBitmap {
    /// Create an empty bitmap with `capacity` slots (including slot 0)
    pub fn new(capacity: u32) -> Self {
        assert!(capacity >= 2, "bitmap capacity {} leaves no usable slot", capacity);
        let words = capacity.div_ceil(WORD_BITS) as usize;
        Self {
            capacity,
            count: 0,
            words: vec![0; words],
        }
    }

    /// Number of slots, including the reserved slot 0
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of live slots
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn contains(&self, index: u32) -> bool {
        if index >= self.capacity {
            return false;
        }
        let (word, mask) = Self::locate(index);
        self.words[word] & mask != 0
    }

    /// Mark `index` live. Returns false if it already was.
    pub fn insert(&mut self, index: u32) -> bool {
        assert!(
            index < self.capacity,
            "index {} out of range for bitmap of {} slots",
            index,
            self.capacity
        );
        let (word, mask) = Self::locate(index);
        if self.words[word] & mask != 0 {
            return false;
        }
        self.words[word] |= mask;
        self.count += 1;
        true
    }

    /// Clear `index`. Returns false if it was not live.
    pub fn remove(&mut self, index: u32) -> bool {
        if index >= self.capacity {
            return false;
        }
        let (word, mask) = Self::locate(index);
        if self.words[word] & mask == 0 {
            return false;
        }
        self.words[word] &= !mask;
        self.count -= 1;
        true
    }

    /// Live slots in ascending index order
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.capacity).filter(move |&index| self.contains(index))
    }

    /// Next slot after `index` in ring order, skipping the reserved slot 0
    pub fn successor(&self, index: u32) -> u32 {
        match (index + 1) % self.capacity {
            0 => 1,
            next => next,
        }
    }

    /// Slot the next allocation would take, or None when the ring is full.
    ///
    /// At most `capacity - 2` slots are ever live: slot 0 is reserved and
    /// the boundary slot separates "full" from "empty".
    pub fn next_free(&self, last_index: u32, oldest_index: u32) -> Option<u32> {
        let mut candidate = (last_index + 1) % self.capacity;
        if candidate == oldest_index {
            return None;
        }
        if candidate == 0 {
            candidate = 1;
        }
        if candidate == oldest_index || self.count >= self.capacity - 2 {
            return None;
        }
        Some(candidate)
    }

    /// Allocate the next slot after `last_index`.
    ///
    /// # Panics
    /// If the slot chosen is already live: the bookkeeping is corrupt and
    /// nothing built on it can be trusted.
    pub fn allocate(&mut self, last_index: u32, oldest_index: u32) -> Option<u32> {
        let index = self.next_free(last_index, oldest_index)?;
        if !self.insert(index) {
            panic!("index {} already set in log bitmap", index);
        }
        Some(index)
    }

    /// New boundary after `freed` (already cleared) was cancelled.
    ///
    /// Only moves when `freed` was the first live slot; it then sweeps
    /// forward over every already-cleared slot, stopping before the first
    /// live one or at `last_index`.
    pub fn advance_oldest(&self, oldest_index: u32, freed: u32, last_index: u32) -> u32 {
        if freed != self.successor(oldest_index) {
            return oldest_index;
        }

        let mut oldest = freed;
        while oldest != last_index {
            let next = self.successor(oldest);
            if self.contains(next) {
                break;
            }
            oldest = next;
        }
        oldest
    }

    fn locate(index: u32) -> (usize, u64) {
        ((index / WORD_BITS) as usize, 1u64 << (index % WORD_BITS))
    }
}
