//! Finds the shortest route to a forced result
//!
//! A proven win or loss says nothing about how far away it is. Re-solving with
//! an increasing depth in fresh tables finds the fastest win, or the loss that
//! can be put off the longest.

use crate::{
    bitboard::Board, error::EngineError, solver::*, transposition_table::ExactTables, Score,
    DRAW, LOSS, WIN,
};

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BestPath {
    pub column: u8,
    /// Plies until the result is reached, or until the board is full for a draw
    pub depth: u8,
    pub score: Score,
}

/// Searches `board` at depth 1, 2, 3 ... until the expected result shows up.
///
/// `target` is the already proven score of the position and only narrows the
/// search window. Returns `Ok(None)` if cancelled through `stop`, or if the
/// board is full or already decided.
pub fn find_best_path(
    board: &Board,
    target: Score,
    stop: Option<&AtomicBool>,
    table_entries: usize,
) -> Result<Option<BestPath>, EngineError> {
    if board.is_full() || decided_score(board).is_some() {
        return Ok(None);
    }

    let (alpha, beta) = match target {
        WIN => (DRAW, WIN),
        LOSS => (LOSS, DRAW),
        _ => (LOSS, WIN),
    };

    let mut tables = ExactTables::new(table_entries);
    tables.prepare(board.move_count())?;

    let mut root = *board;
    let remaining = board.remaining();
    let mut depth = 0;
    let mut score = DRAW;
    while score == DRAW && depth < remaining {
        depth += 1;
        let mut solver = ExactSolver::new(&mut tables);
        if let Some(stop) = stop {
            solver = solver.with_stop(stop);
        }
        score = solver.exact_tree(&mut root, alpha, beta, depth);

        if stop.map_or(false, |stop| stop.load(Ordering::Relaxed)) {
            return Ok(None);
        }
    }

    Ok(retrieve_column(board, &tables).map(|column| BestPath {
        column,
        depth,
        score,
    }))
}
