//! Zobrist keys for incremental board hashing
//!
//! The key table is generated at compile time from a fixed seed, so every
//! consumer sees the same immutable table without any runtime initialisation.

use crate::CELLS;

/// The hash of an empty board, so that the empty position does not hash to 0
pub const INITIAL_HASH: u64 = 0x89B8_4566_FD58_45A4;

/// Seed fed through the mixer to generate the key table
pub const ZOBRIST_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Per-player, per-cell hash keys
pub struct Zobrist {
    keys: [[u64; CELLS]; 2],
}

// Sebastiano Vigna's SplitMix64 step: advances the state and returns the mixed output
const fn splitmix64(state: u64) -> (u64, u64) {
    let next = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = next;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    (next, z ^ (z >> 31))
}

impl Zobrist {
    /// Builds the key table from `seed`, player 0's cells first
    pub const fn new(seed: u64) -> Self {
        let mut keys = [[0; CELLS]; 2];
        let mut state = seed;
        let mut side = 0;
        while side < 2 {
            let mut cell = 0;
            while cell < CELLS {
                let (next, key) = splitmix64(state);
                state = next;
                keys[side][cell] = key;
                cell += 1;
            }
            side += 1;
        }
        Self { keys }
    }

    #[inline]
    pub fn key(&self, side: usize, cell: usize) -> u64 {
        self.keys[side][cell]
    }

    /// Recomputes the hash of a pair of occupancy maps from scratch.
    ///
    /// Only used for validity checks, the search keeps its hash incrementally.
    pub fn full_hash(&self, bitboards: &[u64; 2]) -> u64 {
        let mut hash = INITIAL_HASH;
        for (side, &bitboard) in bitboards.iter().enumerate() {
            let mut remaining = bitboard;
            while remaining != 0 {
                let cell = remaining.trailing_zeros() as usize;
                hash ^= self.keys[side][cell];
                remaining &= remaining - 1;
            }
        }
        hash
    }
}

/// The process-wide key table
pub static ZOBRIST: Zobrist = Zobrist::new(ZOBRIST_SEED);
