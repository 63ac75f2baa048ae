//! Static evaluation of positions nobody can force yet
//!
//! Each side is scored by the fours it could still complete if every cell it
//! can reach were filled with its pieces. Two lenses decide which cells are
//! reachable: "possible" cells lie below every shared barrier, "favorable"
//! cells additionally lie below every pending threat of the opponent.
//! Threats that are one piece away from a four are counted separately.

use crate::bitboard::*;

/// Largest magnitude a static evaluation may reach, proofs own +-1
pub const MAX_HEURISTIC: f32 = 0.99;

/// The four weights combining the per-side differences
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HeuristicWeights {
    pub favorables: f32,
    pub possibles: f32,
    pub favorable_threats: f32,
    pub possible_threats: f32,
}

impl Default for HeuristicWeights {
    fn default() -> Self {
        Self {
            favorables: 0.02,
            possibles: 0.01,
            favorable_threats: 0.08,
            possible_threats: 0.04,
        }
    }
}

impl From<[f32; 4]> for HeuristicWeights {
    fn from(weights: [f32; 4]) -> Self {
        Self {
            favorables: weights[0],
            possibles: weights[1],
            favorable_threats: weights[2],
            possible_threats: weights[3],
        }
    }
}

impl HeuristicWeights {
    pub fn to_array(self) -> [f32; 4] {
        [
            self.favorables,
            self.possibles,
            self.favorable_threats,
            self.possible_threats,
        ]
    }
}

/// The four differences between the side to move and its opponent, in
/// weight order: favorable fours, possible fours, favorable threats and
/// possible threats
pub fn differences(board: &Board) -> [i32; 4] {
    let mine = board.player_bitboard();
    let theirs = board.opponent_bitboard();
    let occupied = mine | theirs;

    // threats that can be filled right now are either a win on the spot or
    // get covered, so only the ones waiting on a lower cell count
    let waiting = !((occupied << 1) | BOTTOM_ROW);
    let threats_mine = winning_holes(mine) & waiting;
    let threats_theirs = winning_holes(theirs) & waiting;

    // nothing gets built on top of a shared threat or two stacked threats
    let barriers = (threats_mine & threats_theirs)
        | (threats_mine & north(threats_mine))
        | (threats_mine & north(threats_theirs));

    let possible_area = !fill_above(barriers);
    let favorable_mine = !fill_above(threats_theirs) & possible_area;
    let favorable_theirs = !fill_above(threats_mine) & possible_area;

    // every cell the opponent has not taken
    let reach_mine = !theirs;
    let reach_theirs = !mine;

    [
        count_lines(reach_mine & favorable_mine) as i32
            - count_lines(reach_theirs & favorable_theirs) as i32,
        count_lines(reach_mine & possible_area) as i32
            - count_lines(reach_theirs & possible_area) as i32,
        (threats_mine & favorable_mine).count_ones() as i32
            - (threats_theirs & favorable_theirs).count_ones() as i32,
        (threats_mine & possible_area).count_ones() as i32
            - (threats_theirs & possible_area).count_ones() as i32,
    ]
}

/// Scores the board for the side to move, strictly inside (-1, 1)
pub fn heuristic(board: &Board, weights: &HeuristicWeights) -> f32 {
    let differences = differences(board);
    let raw: f32 = weights
        .to_array()
        .iter()
        .zip(differences.iter())
        .map(|(weight, &difference)| weight * difference as f32)
        .sum();

    // softsign keeps large sums ordered while bounding them
    let squashed = raw / (1.0 + raw.abs());
    squashed.max(-MAX_HEURISTIC).min(MAX_HEURISTIC)
}
