//! An exact solver for Connect 4 positions
//!
//! Scores are from the point of view of the side to move: a win or loss is a
//! proof that holds at any depth, a draw only means that nothing was forced
//! within the searched depth.

use crate::{
    bitboard::*, error::EngineError, heuristic_table::HeuristicTables, transposition_table::*,
    Score, CELLS, DRAW, INVALID, LOSS, WIDTH, WIN,
};

use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// Returns the columns ordered from the middle outwards, as the middle
/// columns are often better moves
pub const fn move_order() -> [u8; WIDTH] {
    let mut move_order = [0; WIDTH];
    let mut i = 0;
    while i < WIDTH {
        let column = if i % 2 == 0 {
            (WIDTH / 2 - 1) - i / 2
        } else {
            WIDTH / 2 + i / 2
        };
        move_order[i] = column as u8;
        i += 1;
    }
    move_order
}

/// For every column, that column first followed by the default order
const fn preferred_orders() -> [[u8; WIDTH]; WIDTH] {
    let default = move_order();
    let mut orders = [[0; WIDTH]; WIDTH];
    let mut first = 0;
    while first < WIDTH {
        orders[first][0] = first as u8;
        let (mut i, mut j) = (0, 1);
        while i < WIDTH {
            if default[i] as usize != first {
                orders[first][j] = default[i];
                j += 1;
            }
            i += 1;
        }
        first += 1;
    }
    orders
}

/// `MOVE_ORDER[c]` searches column `c` first, then the rest centre out
pub const MOVE_ORDER: [[u8; WIDTH]; WIDTH] = preferred_orders();

/// The column searched first when nothing better is known
pub const DEFAULT_COLUMN: u8 = move_order()[0];

/// Score of a board where a four is already on the board, if any
pub fn decided_score(board: &Board) -> Option<Score> {
    if is_win(board.player_bitboard()) {
        Some(WIN)
    } else if is_win(board.opponent_bitboard()) {
        Some(LOSS)
    } else {
        None
    }
}

/// A negamax search over win/draw/loss scores backed by per-ply exact tables
pub struct ExactSolver<'a> {
    tables: &'a mut ExactTables,
    stop: Option<&'a AtomicBool>,
    publish: Option<(&'a HeuristicTables, u8)>,

    /// The number of nodes searched by this `ExactSolver` so far (for diagnostics only)
    pub node_count: usize,
}

impl<'a> ExactSolver<'a> {
    /// Creates a new `ExactSolver` working in the given tables, which must be
    /// prepared from the ply of the root position onwards
    pub fn new(tables: &'a mut ExactTables) -> Self {
        Self {
            tables,
            stop: None,
            publish: None,
            node_count: 0,
        }
    }

    /// Makes the search poll `stop` and unwind as soon as it is set
    pub fn with_stop(mut self, stop: &'a AtomicBool) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Copies proven results searched deeper than `threshold` into the
    /// heuristic tables, so heuristic searches pick them up
    pub fn with_publishing(mut self, tables: &'a HeuristicTables, threshold: u8) -> Self {
        self.publish = Some((tables, threshold));
        self
    }

    #[inline]
    fn stopped(&self) -> bool {
        self.stop.map_or(false, |stop| stop.load(Ordering::Relaxed))
    }

    /// Stores a result in the exact tables and, for proofs, in the heuristic ones
    fn record(&mut self, board: &Board, depth: u8, score: Score, bound: Bound, best_col: u8) -> Score {
        if let Some((heuristic_tables, threshold)) = self.publish {
            if score != DRAW && bound == Bound::Exact && depth > threshold {
                heuristic_tables.record_solution(
                    board.move_count(),
                    board.hash(),
                    score as f32,
                    best_col,
                    depth,
                );
            }
        }
        self.tables
            .store(board.move_count(), board.hash(), depth, score, bound, best_col)
    }

    /// Performs game tree search up to `depth` plies
    ///
    /// Returns the score of the position for the side to move. A cancelled
    /// search returns a draw and stores nothing further up the tree.
    pub fn exact_tree(&mut self, board: &mut Board, mut alpha: Score, mut beta: Score, depth: u8) -> Score {
        self.node_count += 1;

        if self.stopped() || depth == 0 || board.is_full() {
            return DRAW;
        }

        let alpha0 = alpha;
        let ply = board.move_count();
        let last_ply = ply as usize == CELLS - 1;
        let mut first_col = DEFAULT_COLUMN;

        match self.tables.get(ply, board.hash()) {
            Some(entry) => {
                // wins and losses are proofs whatever depth they were found at
                if entry.score != DRAW {
                    return entry.score;
                }
                if entry.depth >= depth {
                    match entry.bound {
                        Bound::Exact => return entry.score,
                        Bound::Lower => {
                            alpha = alpha.max(entry.score);
                            if alpha >= beta {
                                return entry.score;
                            }
                        }
                        Bound::Upper => {
                            beta = beta.min(entry.score);
                            if alpha >= beta {
                                return entry.score;
                            }
                        }
                    }
                }
                // the entry proves there is no immediate win
                if depth == 1 || last_ply {
                    return DRAW;
                }
                first_col = entry.best_col;
            }
            None => {
                // check for next-move win for current player
                let mut playable = None;
                for &column in MOVE_ORDER[first_col as usize].iter() {
                    if !board.can_play(column as usize) {
                        continue;
                    }
                    if board.winning_move(column as usize) {
                        return self.record(board, 1, WIN, Bound::Exact, column);
                    }
                    if playable.is_none() {
                        playable = Some(column);
                    }
                }
                if depth == 1 || last_ply {
                    // the board is not full, so some column is open
                    let column = playable.unwrap_or(first_col);
                    return self.record(board, depth, DRAW, Bound::Exact, column);
                }
            }
        }

        let mut best = INVALID;
        let mut best_col = first_col;

        // search the next level of the tree
        for &column in MOVE_ORDER[first_col as usize].iter() {
            let column = column as usize;
            if !board.can_play(column) {
                continue;
            }

            board.play_move(column);
            // the search window is flipped for the other player
            let score = -self.exact_tree(board, -beta, -alpha, depth - 1);
            board.undo_move(column);

            if self.stopped() {
                return DRAW;
            }

            if score > best {
                best = score;
                best_col = column as u8;
            }
            if score > alpha {
                alpha = score;
            }
            // a perfect opponent will not allow this branch
            if alpha >= beta {
                let bound = if best != DRAW { Bound::Exact } else { Bound::Lower };
                return self.record(board, depth, best, bound, best_col);
            }
        }

        let bound = if best <= alpha0 && best == DRAW {
            Bound::Upper
        } else {
            Bound::Exact
        };
        self.record(board, depth, best, bound, best_col)
    }
}

/// Solves a board up to `depth` plies after checking its validity.
///
/// Boards that already hold a four are scored without searching. The depth
/// is clamped to the plies left on the board.
pub fn solve_board(board: &Board, depth: u8, tables: &mut ExactTables) -> Result<Score, EngineError> {
    board.validate()?;
    if let Some(score) = decided_score(board) {
        return Ok(score);
    }

    let depth = depth.min(board.remaining());
    tables.prepare(board.move_count())?;

    let mut board = *board;
    Ok(ExactSolver::new(tables).exact_tree(&mut board, LOSS, WIN, depth))
}

/// Fetches the best column stored for a board, if it has been searched
pub fn retrieve_column(board: &Board, tables: &ExactTables) -> Option<u8> {
    tables
        .get(board.move_count(), board.hash())
        .map(|entry| entry.best_col)
}

/// Solves many boards at once, each on its own thread with its own tables
pub fn solve_positions(
    boards: &[Board],
    depth: u8,
    table_entries: usize,
) -> Vec<Result<(Score, Option<u8>), EngineError>> {
    boards
        .par_iter()
        .map(|board| {
            let mut tables = ExactTables::new(table_entries);
            let score = solve_board(board, depth, &mut tables)?;
            Ok((score, retrieve_column(board, &tables)))
        })
        .collect()
}
