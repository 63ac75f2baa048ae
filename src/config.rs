//! Engine and search configuration

use crate::heuristic::HeuristicWeights;
use crate::transposition_table::table_size;

/// Parameters of the heuristic search and of the depth counters driving it
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SearchParams {
    pub weights: HeuristicWeights,
    /// Plies of exact search run below every heuristic leaf
    pub exact_tail: u8,
    /// Nodes deeper than this get a 1-ply lookahead to order their moves,
    /// shallower nodes are ordered by column height
    pub ordering_depth: u8,
    /// Depth the heuristic worker restarts from after a position update
    pub min_heuristic_depth: u8,
    /// Depth the exact worker restarts from after a position update
    pub min_exact_depth: u8,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            weights: HeuristicWeights::default(),
            exact_tail: 4,
            ordering_depth: 2,
            min_heuristic_depth: 3,
            min_exact_depth: 8,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Entries of every per-ply table, rounded up to a power of two
    pub table_entries: usize,
    /// Entries of the throwaway tables used to extract forced paths
    pub scratch_entries: usize,
    /// Proven exact results are copied into the heuristic tables only when
    /// searched deeper than this, shallow ones are cheap to find again
    pub publish_threshold: u8,
    pub search: SearchParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            table_entries: 1 << 14,
            scratch_entries: 1 << 12,
            publish_threshold: 6,
            search: SearchParams::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_table_entries(mut self, entries: usize) -> Self {
        self.table_entries = entries;
        self
    }

    pub fn with_scratch_entries(mut self, entries: usize) -> Self {
        self.scratch_entries = entries;
        self
    }

    pub fn with_publish_threshold(mut self, threshold: u8) -> Self {
        self.publish_threshold = threshold;
        self
    }

    pub fn with_search(mut self, search: SearchParams) -> Self {
        self.search = search;
        self
    }

    /// Rounds table sizes to what will actually be allocated
    pub fn validated(mut self) -> Self {
        self.table_entries = table_size(self.table_entries);
        self.scratch_entries = table_size(self.scratch_entries);
        self
    }
}
