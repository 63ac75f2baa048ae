//! A depth-limited heuristic search for positions too deep to solve
//!
//! Negamax over `f32` evaluations in `[-1, 1]`, where the end points are
//! proven results and everything in between comes from the static evaluator.
//! Nodes are ordered either by a 1-ply lookahead or by column height, and all
//! but the first child are searched with a null window first.

use crate::{
    bitboard::*,
    config::SearchParams,
    engine::{EvalFlag, Evaluation, NO_COLUMN},
    error::EngineError,
    heuristic::heuristic,
    heuristic_table::*,
    path_finder::find_best_path,
    solver::*,
    transposition_table::{Bound, ExactTables},
    Score, DRAW, EVAL_EPSILON, HEIGHT, INVALID, LOSS, LOSS_EVAL, WIDTH, WIN, WIN_EVAL,
};

use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// From this many moves on, one-shot evaluations solve the position exactly
pub const SOLVE_TRIGGER: u8 = 30;

/// Orders columns by descending stack height, full columns last
fn order_by_height(heights: &[u8; WIDTH], order: &mut [u8; WIDTH]) {
    order.sort_by_key(|&column| {
        let height = heights[column as usize];
        (height as usize == HEIGHT, Reverse(height))
    });
}

pub struct HeuristicSolver<'a> {
    tables: &'a HeuristicTables,
    tail: ExactSolver<'a>,
    params: SearchParams,
    stop: Option<&'a AtomicBool>,

    /// The number of nodes searched by this `HeuristicSolver` so far (for diagnostics only)
    pub node_count: usize,
}

impl<'a> HeuristicSolver<'a> {
    /// Creates a new `HeuristicSolver`. The exact tables back the exact tail
    /// and must be prepared from the root ply onwards.
    pub fn new(tables: &'a HeuristicTables, exact_tables: &'a mut ExactTables, params: SearchParams) -> Self {
        Self {
            tables,
            tail: ExactSolver::new(exact_tables),
            params,
            stop: None,
            node_count: 0,
        }
    }

    pub fn with_stop(mut self, stop: &'a AtomicBool) -> Self {
        self.tail = self.tail.with_stop(stop);
        self.stop = Some(stop);
        self
    }

    #[inline]
    fn stopped(&self) -> bool {
        self.stop.map_or(false, |stop| stop.load(Ordering::Relaxed))
    }

    fn store(&self, board: &Board, order: [u8; WIDTH], eval: f32, depth: u8, bound: Bound) -> f32 {
        self.tables.store(
            board.move_count(),
            HtEntry::new(board.hash(), order, eval, depth, self.params.exact_tail, bound),
        )
    }

    /// The static evaluation, unless a short exact search proves a result
    pub fn evaluate_leaf(&mut self, board: &mut Board) -> f32 {
        if self.params.exact_tail > 0 {
            let score = self.tail.exact_tree(board, LOSS, WIN, self.params.exact_tail);
            if score != DRAW {
                return score as f32;
            }
        }
        heuristic(board, &self.params.weights)
    }

    /// Scores every child with a 1-ply lookahead and sorts `order` best first.
    ///
    /// Returns the best score found, which is a win if a column wins on the
    /// spot and a loss if every move runs into a proven loss.
    fn order_moves(&mut self, board: &mut Board, order: &mut [u8; WIDTH]) -> f32 {
        let mut scores = [INVALID as f32; WIDTH];

        for i in 0..WIDTH {
            let column = order[i] as usize;
            if !board.can_play(column) {
                continue;
            }
            if board.winning_move(column) {
                order.swap(0, i);
                return WIN_EVAL;
            }

            board.play_move(column);
            scores[i] = -self.evaluate_leaf(board);
            board.undo_move(column);

            // insert into the sorted prefix
            let mut j = i;
            while j > 0 && scores[j] > scores[j - 1] {
                scores.swap(j, j - 1);
                order.swap(j, j - 1);
                j -= 1;
            }
        }
        scores[0]
    }

    /// Performs heuristic game tree search up to `depth` plies
    ///
    /// Returns the evaluation of the position for the side to move. A
    /// cancelled search unwinds returning `alpha`.
    pub fn heuristic_tree(&mut self, board: &mut Board, mut alpha: f32, mut beta: f32, depth: u8) -> f32 {
        self.node_count += 1;

        if board.is_full() {
            return 0.0;
        }
        if self.stopped() {
            return alpha;
        }

        let ordering_depth = self.params.ordering_depth;
        let mut order = move_order();

        let stored = self.tables.get(board.move_count(), board.hash());
        if let Some(entry) = stored {
            if entry.is_terminal() {
                return entry.eval;
            }
            if entry.heu_depth >= depth {
                match entry.bound {
                    Bound::Exact => return entry.eval,
                    Bound::Lower => {
                        if entry.eval >= beta {
                            return entry.eval;
                        }
                        alpha = alpha.max(entry.eval);
                    }
                    Bound::Upper => {
                        if entry.eval <= alpha {
                            return entry.eval;
                        }
                        beta = beta.min(entry.eval);
                    }
                }
            }
            if depth == 0 {
                return self.evaluate_leaf(board);
            }
            if entry.heu_depth > 0 {
                order = entry.order;
            }
        }

        // order on first sight, or when the stored order came from a
        // cheaper ordering than this depth calls for
        let reorder = match stored {
            None => true,
            Some(entry) => {
                entry.heu_depth == 0
                    || (entry.heu_depth <= ordering_depth && depth > ordering_depth)
            }
        };

        if reorder {
            if depth > ordering_depth {
                let surface = self.order_moves(board, &mut order);
                if self.stopped() {
                    return alpha;
                }
                if is_terminal(surface) {
                    return self.store(board, order, surface, depth, Bound::Exact);
                }
            } else {
                if depth == 0 {
                    let eval = self.evaluate_leaf(board);
                    if self.stopped() {
                        return alpha;
                    }
                    return self.store(board, order, eval, depth, Bound::Exact);
                }

                order_by_height(board.heights(), &mut order);

                // wins are only checked here, children never see a won board
                for i in 0..WIDTH {
                    let column = order[i] as usize;
                    if !board.can_play(column) {
                        break;
                    }
                    if board.winning_move(column) {
                        order.swap(0, i);
                        return self.store(board, order, WIN_EVAL, depth, Bound::Exact);
                    }
                }
            }
        }

        let alpha0 = alpha;
        let mut best = LOSS_EVAL;
        let mut searched = false;

        for i in 0..WIDTH {
            let column = order[i] as usize;
            if !board.can_play(column) {
                continue;
            }

            board.play_move(column);
            let score = if !searched {
                -self.heuristic_tree(board, -beta, -alpha, depth - 1)
            } else {
                // prove the move is no better than alpha with a null window
                let probe = -self.heuristic_tree(board, -alpha - EVAL_EPSILON, -alpha, depth - 1);
                if probe > alpha && !self.stopped() {
                    -self.heuristic_tree(board, -beta, -alpha, depth - 1)
                } else {
                    probe
                }
            };
            board.undo_move(column);

            if self.stopped() {
                return alpha;
            }

            if !searched || score > best {
                best = score;
                // keep the principal move at the front
                order[..=i].rotate_right(1);

                if best > alpha {
                    alpha = best;
                    if alpha >= beta {
                        let bound = if alpha >= WIN_EVAL { Bound::Exact } else { Bound::Lower };
                        return self.store(board, order, best, depth, bound);
                    }
                }
            }
            searched = true;
        }

        let bound = if best <= alpha0 && best != LOSS_EVAL {
            Bound::Upper
        } else {
            Bound::Exact
        };
        self.store(board, order, best, depth, bound)
    }
}

/// Turns a proven score into an evaluation carrying the shortest path to it
fn forced_evaluation(
    board: &Board,
    score: Score,
    fallback_column: u8,
    fallback_depth: u8,
    scratch_entries: usize,
) -> Result<Evaluation, EngineError> {
    let (column, depth) = match find_best_path(board, score, None, scratch_entries)? {
        Some(path) => (path.column, path.depth),
        None => (fallback_column, fallback_depth),
    };
    Ok(Evaluation::new(score as f32, column, depth))
}

/// Evaluates a board to `depth` plies after checking its validity.
///
/// Late in the game, or when the search would reach the end of the board
/// anyway, the position is solved exactly instead. Forced results report the
/// fastest win or slowest loss.
pub fn evaluate_board(
    board: &Board,
    depth: u8,
    params: &SearchParams,
    tables: &HeuristicTables,
    exact_tables: &mut ExactTables,
    scratch_entries: usize,
) -> Result<Evaluation, EngineError> {
    if board.is_invalid() {
        return Ok(Evaluation::invalid());
    }
    if let Some(score) = decided_score(board) {
        return Ok(Evaluation::new(score as f32, NO_COLUMN, 0));
    }
    if board.is_full() {
        return Ok(Evaluation::new(0.0, NO_COLUMN, 0));
    }

    let remaining = board.remaining();
    if depth as usize + params.exact_tail as usize > remaining as usize
        || board.move_count() >= SOLVE_TRIGGER
    {
        let score = solve_board(board, remaining, exact_tables)?;
        let column = retrieve_column(board, exact_tables).unwrap_or(DEFAULT_COLUMN);
        if score != DRAW {
            return forced_evaluation(board, score, column, remaining, scratch_entries);
        }
        return Ok(Evaluation::new(0.0, column, remaining));
    }

    exact_tables.prepare(board.move_count())?;
    let mut root = *board;
    let eval = HeuristicSolver::new(tables, exact_tables, *params).heuristic_tree(
        &mut root,
        LOSS_EVAL,
        WIN_EVAL,
        depth,
    );
    let column = tables
        .get(board.move_count(), board.hash())
        .map_or(DEFAULT_COLUMN, |entry| entry.order[0]);

    if is_terminal(eval) {
        return forced_evaluation(board, eval as Score, column, depth, scratch_entries);
    }
    Ok(Evaluation::new(eval, column, depth))
}

/// Evaluates a board with iterative deepening until `budget` runs out or a
/// forced result shows up, returning the deepest completed evaluation.
///
/// The deadline is only checked between passes, so the last pass may overrun it.
pub fn evaluate_board_timed(
    board: &Board,
    budget: Duration,
    params: &SearchParams,
    tables: &HeuristicTables,
    exact_tables: &mut ExactTables,
    scratch_entries: usize,
) -> Result<Evaluation, EngineError> {
    let deadline = Instant::now() + budget;
    let remaining = board.remaining();

    let mut depth = 1;
    loop {
        let evaluation = evaluate_board(board, depth, params, tables, exact_tables, scratch_entries)?;
        let solved = depth as usize + params.exact_tail as usize > remaining as usize
            || board.move_count() >= SOLVE_TRIGGER;

        match evaluation.flag {
            EvalFlag::CurrentPlayerBetter | EvalFlag::OtherPlayerBetter | EvalFlag::Draw
                if !solved && Instant::now() < deadline =>
            {
                depth += 1
            }
            _ => return Ok(evaluation),
        }
    }
}
