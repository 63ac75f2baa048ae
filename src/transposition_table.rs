//! Transposition tables for the exact solver
//!
//! One table per ply, each owned by a single search at a time. Entries live in
//! buckets of two sibling slots (`index` and `index ^ 1`).

use crate::error::EngineError;
use crate::{Score, CELLS};

/// How a stored score relates to the true value of the position
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Bound {
    Exact,
    Lower,
    Upper,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TtEntry {
    pub key: u64,
    /// Remaining depth the score was searched to, 0 marks an empty slot
    pub depth: u8,
    pub score: Score,
    pub bound: Bound,
    pub best_col: u8,
}

impl TtEntry {
    const EMPTY: Self = Self {
        key: 0,
        depth: 0,
        score: 0,
        bound: Bound::Exact,
        best_col: 0,
    };
}

/// Rounds a requested entry count to the power of two actually allocated
pub fn table_size(entries: usize) -> usize {
    entries.max(2).next_power_of_two()
}

#[derive(Clone)]
pub struct TranspositionTable {
    entries: Vec<TtEntry>,
    mask: usize,
}

impl TranspositionTable {
    pub fn with_entries(entries: usize) -> Result<Self, EngineError> {
        let size = table_size(entries);
        let mut table = Vec::new();
        table
            .try_reserve_exact(size)
            .map_err(|_| EngineError::TableAllocation { entries: size })?;
        table.resize(size, TtEntry::EMPTY);

        Ok(Self {
            entries: table,
            mask: size - 1,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks `key` up in both slots of its bucket
    pub fn get(&self, key: u64) -> Option<TtEntry> {
        let index = key as usize & self.mask;
        [index, index ^ 1]
            .iter()
            .map(|&i| self.entries[i])
            .find(|entry| entry.depth != 0 && entry.key == key)
    }

    /// The slot holding `key`, or on a miss the sibling with the shallower depth
    fn probe_index(&self, key: u64) -> usize {
        let index = key as usize & self.mask;
        if self.entries[index].key == key {
            index
        } else if self.entries[index ^ 1].key == key {
            index ^ 1
        } else if self.entries[index].depth <= self.entries[index ^ 1].depth {
            index
        } else {
            index ^ 1
        }
    }

    /// Returns the entry stored for `key`, or the entry a store of `key`
    /// would evict
    pub fn probe(&self, key: u64) -> TtEntry {
        self.entries[self.probe_index(key)]
    }

    /// Stores a result and hands the score back, so callers can
    /// `return table.store(...)`.
    ///
    /// A slot already holding `key` is only replaced by an equal or deeper
    /// search. Otherwise the probed victim is evicted.
    pub fn store(&mut self, key: u64, depth: u8, score: Score, bound: Bound, best_col: u8) -> Score {
        let slot = self.probe_index(key);
        let entry = &mut self.entries[slot];
        if depth >= entry.depth || entry.key != key {
            *entry = TtEntry {
                key,
                depth,
                score,
                bound,
                best_col,
            };
        }
        score
    }

    pub fn clear(&mut self) {
        for entry in self.entries.iter_mut() {
            *entry = TtEntry::EMPTY;
        }
    }
}

/// One lazily allocated exact table per ply (move count 0..=64)
pub struct ExactTables {
    tables: Vec<Option<TranspositionTable>>,
    entries: usize,
}

impl ExactTables {
    pub fn new(entries: usize) -> Self {
        Self {
            tables: vec![None; CELLS + 1],
            entries,
        }
    }

    /// Allocates the tables for every ply from `first_ply` to the end of the game
    pub fn prepare(&mut self, first_ply: u8) -> Result<(), EngineError> {
        for table in self.tables[first_ply as usize..].iter_mut() {
            if table.is_none() {
                *table = Some(TranspositionTable::with_entries(self.entries)?);
            }
        }
        Ok(())
    }

    pub fn get(&self, ply: u8, key: u64) -> Option<TtEntry> {
        self.tables[ply as usize]
            .as_ref()
            .and_then(|table| table.get(key))
    }

    /// Stores into the table of `ply` if it has been prepared
    pub fn store(&mut self, ply: u8, key: u64, depth: u8, score: Score, bound: Bound, best_col: u8) -> Score {
        match self.tables[ply as usize].as_mut() {
            Some(table) => table.store(key, depth, score, bound, best_col),
            None => score,
        }
    }

    pub fn clear(&mut self) {
        for table in self.tables.iter_mut().flatten() {
            table.clear();
        }
    }
}
