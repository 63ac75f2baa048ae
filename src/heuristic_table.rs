//! Transposition tables for the heuristic solver
//!
//! These are shared between every search thread, so each slot sits behind its
//! own lock. Critical sections are a single entry copy.

use crate::error::EngineError;
use crate::solver::MOVE_ORDER;
use crate::transposition_table::{table_size, Bound};
use crate::{CELLS, LOSS_EVAL, WIDTH, WIN_EVAL};

use parking_lot::Mutex;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HtEntry {
    pub key: u64,
    /// Columns best first, as last searched from this position
    pub order: [u8; WIDTH],
    pub eval: f32,
    pub heu_depth: u8,
    /// Depth of the exact tail run at the leaves of this search
    pub exact_depth: u8,
    pub bound: Bound,
    filled: bool,
}

impl HtEntry {
    const EMPTY: Self = Self {
        key: 0,
        order: [0; WIDTH],
        eval: 0.0,
        heu_depth: 0,
        exact_depth: 0,
        bound: Bound::Exact,
        filled: false,
    };

    pub fn new(key: u64, order: [u8; WIDTH], eval: f32, heu_depth: u8, exact_depth: u8, bound: Bound) -> Self {
        Self {
            key,
            order,
            eval,
            heu_depth,
            exact_depth,
            bound,
            filled: true,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.filled
    }

    /// Is the eval a proven result rather than an estimate
    pub fn is_terminal(&self) -> bool {
        is_terminal(self.eval)
    }
}

#[inline]
pub fn is_terminal(eval: f32) -> bool {
    eval >= WIN_EVAL || eval <= LOSS_EVAL
}

/// Picks the slot of a bucket holding `key`, or the one to evict on a miss:
/// an empty slot first, then the shallower heuristic depth
fn choose(a: &HtEntry, b: &HtEntry, key: u64) -> usize {
    if a.filled && a.key == key {
        0
    } else if b.filled && b.key == key {
        1
    } else if !a.filled || (b.filled && a.heu_depth <= b.heu_depth) {
        0
    } else {
        1
    }
}

pub struct HeuristicTable {
    slots: Vec<Mutex<HtEntry>>,
    mask: usize,
}

impl HeuristicTable {
    pub fn with_entries(entries: usize) -> Result<Self, EngineError> {
        let size = table_size(entries);
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(size)
            .map_err(|_| EngineError::TableAllocation { entries: size })?;
        slots.extend((0..size).map(|_| Mutex::new(HtEntry::EMPTY)));

        Ok(Self {
            slots,
            mask: size - 1,
        })
    }

    #[inline]
    fn bucket(&self, key: u64) -> usize {
        key as usize & self.mask & !1
    }

    pub fn get(&self, key: u64) -> Option<HtEntry> {
        let bucket = self.bucket(key);
        self.slots[bucket..bucket + 2]
            .iter()
            .map(|slot| *slot.lock())
            .find(|entry| entry.filled && entry.key == key)
    }

    /// Returns the entry stored for `key`, or the entry a store of `key`
    /// would evict
    pub fn probe(&self, key: u64) -> HtEntry {
        let bucket = self.bucket(key);
        let pair = [*self.slots[bucket].lock(), *self.slots[bucket + 1].lock()];
        pair[choose(&pair[0], &pair[1], key)]
    }

    /// Stores a result and returns its eval.
    ///
    /// An existing entry for `key` is kept only if it is terminal or deeper
    /// than a non-terminal replacement. On a miss the probed victim is evicted.
    pub fn store(&self, entry: HtEntry) -> f32 {
        let key = entry.key;
        // both slots are always locked lowest first
        let bucket = self.bucket(key);
        let mut pair = [self.slots[bucket].lock(), self.slots[bucket + 1].lock()];
        let slot = choose(&pair[0], &pair[1], key);
        let current = *pair[slot];

        if !current.filled
            || current.key != key
            || (entry.heu_depth >= current.heu_depth && !current.is_terminal())
            || entry.is_terminal()
        {
            *pair[slot] = entry;
        }
        entry.eval
    }

    pub fn clear(&self) {
        for slot in self.slots.iter() {
            *slot.lock() = HtEntry::EMPTY;
        }
    }
}

/// One heuristic table per ply, allocated up front and shared by reference
pub struct HeuristicTables {
    tables: Vec<HeuristicTable>,
}

impl HeuristicTables {
    pub fn new(entries: usize) -> Result<Self, EngineError> {
        let tables = (0..=CELLS)
            .map(|_| HeuristicTable::with_entries(entries))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { tables })
    }

    pub fn get(&self, ply: u8, key: u64) -> Option<HtEntry> {
        self.tables[ply as usize].get(key)
    }

    pub fn probe(&self, ply: u8, key: u64) -> HtEntry {
        self.tables[ply as usize].probe(key)
    }

    pub fn store(&self, ply: u8, entry: HtEntry) -> f32 {
        self.tables[ply as usize].store(entry)
    }

    /// Records a proven result found outside the heuristic search
    pub fn record_solution(&self, ply: u8, key: u64, eval: f32, best_col: u8, exact_depth: u8) {
        let order = MOVE_ORDER[best_col as usize];
        self.store(ply, HtEntry::new(key, order, eval, 0, exact_depth, Bound::Exact));
    }

    pub fn clear(&self) {
        for table in self.tables.iter() {
            table.clear();
        }
    }
}
