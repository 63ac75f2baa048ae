//! The background evaluation engine
//!
//! An [`Engine`] owns a position and keeps two kinds of search running on it:
//! a heuristic worker deepening an estimate, and an exact worker trying to
//! prove a forced result. A long-lived main loop thread launches one pass of
//! each kind at a time, advancing each kind's depth after every completed
//! pass, until one of them proves the position.
//!
//! Callers can suspend and resume the searches, swap in a new position, or
//! block until an evaluation is good enough.

use crate::{
    bitboard::Board,
    config::EngineConfig,
    error::EngineError,
    heuristic_solver::HeuristicSolver,
    heuristic_table::{is_terminal, HeuristicTables},
    path_finder::find_best_path,
    scheduler::{Features, FixedScheduler, Scheduler},
    solver::*,
    transposition_table::ExactTables,
    SearchParams, Score, DRAW, LOSS, LOSS_EVAL, WIDTH, WIN, WIN_EVAL,
};

use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Reported as the best column when there is no move to make
pub const NO_COLUMN: u8 = WIDTH as u8;

/// What an evaluation says about the position, from the side to move
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EvalFlag {
    CurrentPlayerWin,
    Draw,
    OtherPlayerWin,
    InvalidBoard,
    CurrentPlayerBetter,
    OtherPlayerBetter,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Evaluation {
    /// In `[-1, 1]`, the end points being proven results
    pub eval: f32,
    pub best_column: u8,
    /// Plies searched, or plies to the result once it is forced
    pub depth: u8,
    pub flag: EvalFlag,
}

impl Evaluation {
    /// Classifies `eval` from the point of view of the side to move
    pub fn new(eval: f32, best_column: u8, depth: u8) -> Self {
        let flag = if eval >= WIN_EVAL {
            EvalFlag::CurrentPlayerWin
        } else if eval <= LOSS_EVAL {
            EvalFlag::OtherPlayerWin
        } else if eval > 0.0 {
            EvalFlag::CurrentPlayerBetter
        } else if eval < 0.0 {
            EvalFlag::OtherPlayerBetter
        } else {
            EvalFlag::Draw
        };
        Self {
            eval,
            best_column,
            depth,
            flag,
        }
    }

    pub fn invalid() -> Self {
        Self {
            eval: 0.0,
            best_column: 0,
            depth: 0,
            flag: EvalFlag::InvalidBoard,
        }
    }

    /// True for a proven win or loss
    pub fn is_forced(&self) -> bool {
        matches!(
            self.flag,
            EvalFlag::CurrentPlayerWin | EvalFlag::OtherPlayerWin
        )
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            error!("engine mutex was poisoned, attempting recovery");
            poisoned.into_inner()
        }
    }
}

fn wait_or_recover<'a, T>(condvar: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    condvar.wait(guard).unwrap_or_else(|poisoned| {
        error!("engine mutex was poisoned while waiting, attempting recovery");
        poisoned.into_inner()
    })
}

/// The solution of a board that already holds a four or is full
fn decided_evaluation(board: &Board) -> Option<Evaluation> {
    match decided_score(board) {
        Some(score) => Some(Evaluation::new(score as f32, NO_COLUMN, 0)),
        None if board.is_full() => Some(Evaluation::new(0.0, NO_COLUMN, 0)),
        None => None,
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Kind {
    Heuristic,
    Exact,
}

enum PassResult {
    /// The pass finished without proving anything, heuristic passes carry
    /// their estimate
    Completed(Option<Evaluation>),
    Solved(Evaluation),
    Cancelled,
    Failed(EngineError),
}

struct State {
    board: Board,
    /// `(move_count + side_to_play) % 2` of the game under evaluation
    parity: u8,

    suspended: bool,
    /// The main loop has stopped every worker after a suspension
    paused: bool,
    terminate: bool,
    position_updated: bool,
    /// No worker is running and none can be launched
    idle: bool,

    solution: Option<Evaluation>,
    best: Option<Evaluation>,

    // next depth to search and last completed depth, per kind
    heuristic_depth: u8,
    heuristic_reached: u8,
    exact_depth: u8,
    exact_reached: u8,

    max_depth: Option<u8>,
    deadline: Option<Instant>,

    /// Bumped on every cancellation, results from older epochs are dropped
    epoch: u64,
    token: Arc<AtomicBool>,

    heuristic_running: bool,
    exact_running: bool,
    // a kind that failed to spawn or allocate sits out until the next epoch
    heuristic_failed: bool,
    exact_failed: bool,
}

impl State {
    fn cancel_workers(&mut self) {
        self.token.store(true, Ordering::Relaxed);
        self.epoch += 1;
    }

    fn current_evaluation(&self) -> Evaluation {
        self.solution
            .or(self.best)
            .unwrap_or_else(Evaluation::invalid)
    }

    fn features(&self) -> Features {
        Features {
            move_count: self.board.move_count(),
            heights: *self.board.heights(),
            heuristic_depth: self.heuristic_reached,
            exact_depth: self.exact_reached,
            time_remaining: self
                .deadline
                .map(|deadline| deadline.saturating_duration_since(Instant::now())),
            side_to_play: self.board.side_to_play(),
        }
    }

    fn within_max_depth(&self, depth: u8) -> bool {
        self.max_depth.map_or(true, |max| depth <= max)
    }

    /// The heuristic worker has no pass left to launch on this position
    fn heuristic_exhausted(&self) -> bool {
        let depth = self.heuristic_depth;
        !self.heuristic_running
            && !self.position_updated
            && (self.heuristic_failed
                || depth == 0
                || depth > self.board.remaining()
                || !self.within_max_depth(depth))
    }
}

struct Shared {
    state: Mutex<State>,
    /// Wakes the main loop
    wake: Condvar,
    /// Wakes callers waiting on progress
    changed: Condvar,

    heuristic_tables: HeuristicTables,
    // exact tables of the heuristic tail and of the exact worker, one writer each
    heuristic_exact: Mutex<ExactTables>,
    exact_tables: Mutex<ExactTables>,

    config: EngineConfig,
    scheduler: Box<dyn Scheduler>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        lock_or_recover(&self.state)
    }

    fn notify(&self) {
        self.wake.notify_all();
        self.changed.notify_all();
    }

    fn params(&self, state: &State, heuristic_depth: u8) -> SearchParams {
        self.scheduler
            .schedule(&state.features())
            .clamped(state.board.move_count(), heuristic_depth)
    }

    fn reset_depths(&self, state: &mut State) {
        let params = self.params(state, 0);
        state.heuristic_depth = params.min_heuristic_depth;
        state.exact_depth = params.min_exact_depth;
        state.heuristic_reached = 0;
        state.exact_reached = 0;
    }
}

/// A Connect 4 engine evaluating its position in the background
///
/// # Notes
/// Every query is answered from whatever the workers have completed so far.
/// Passes are only checked against the deadline between passes, so a single
/// deep pass can keep running after an [`Engine::evaluate_for`] returns.
pub struct Engine {
    shared: Arc<Shared>,
    main_loop: Option<JoinHandle<()>>,
}

impl Engine {
    /// Creates an engine with the default configuration and fixed search
    /// parameters, evaluating `board` or the empty board
    pub fn new(board: Option<Board>, start_suspended: bool) -> Result<Self, EngineError> {
        let config = EngineConfig::default();
        Self::with_config(
            board,
            start_suspended,
            config,
            Box::new(FixedScheduler::new(config.search)),
        )
    }

    pub fn with_config(
        board: Option<Board>,
        start_suspended: bool,
        config: EngineConfig,
        scheduler: Box<dyn Scheduler>,
    ) -> Result<Self, EngineError> {
        let board = board.unwrap_or_default();
        board.validate()?;
        let config = config.validated();

        let state = State {
            board,
            parity: (board.move_count() + board.side_to_play()) % 2,
            suspended: start_suspended,
            paused: false,
            terminate: false,
            position_updated: false,
            idle: false,
            solution: decided_evaluation(&board),
            best: None,
            heuristic_depth: 0,
            heuristic_reached: 0,
            exact_depth: 0,
            exact_reached: 0,
            max_depth: None,
            deadline: None,
            epoch: 0,
            token: Arc::new(AtomicBool::new(false)),
            heuristic_running: false,
            exact_running: false,
            heuristic_failed: false,
            exact_failed: false,
        };

        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            wake: Condvar::new(),
            changed: Condvar::new(),
            heuristic_tables: HeuristicTables::new(config.table_entries)?,
            heuristic_exact: Mutex::new(ExactTables::new(config.table_entries)),
            exact_tables: Mutex::new(ExactTables::new(config.table_entries)),
            config,
            scheduler,
        });
        {
            let mut state = shared.lock_state();
            shared.reset_depths(&mut state);
        }

        let loop_shared = Arc::clone(&shared);
        let main_loop = thread::Builder::new()
            .name("connect4-engine".into())
            .spawn(move || main_loop(loop_shared))
            .map_err(|err| EngineError::Spawn(err.to_string()))?;

        Ok(Self {
            shared,
            main_loop: Some(main_loop),
        })
    }

    /// Stops every worker, returning once they have all been joined
    pub fn suspend(&self) {
        let mut state = self.shared.lock_state();
        if state.suspended && state.paused {
            return;
        }
        state.suspended = true;
        state.cancel_workers();
        self.shared.notify();

        while !state.paused && !state.terminate {
            state = wait_or_recover(&self.shared.changed, state);
        }
    }

    /// Restarts the workers, returning once the main loop is running again
    pub fn resume(&self) {
        let mut state = self.shared.lock_state();
        if !state.suspended {
            return;
        }
        state.suspended = false;
        state.idle = false;
        self.shared.notify();

        while state.paused && !state.terminate {
            state = wait_or_recover(&self.shared.changed, state);
        }
    }

    /// Replaces the position under evaluation.
    ///
    /// The board must be valid and keep the side-to-move parity of the game
    /// this engine was created for, otherwise nothing changes. Both depth
    /// counters restart from their minimums.
    pub fn update_position(&self, board: &Board) -> Result<(), EngineError> {
        board.validate()?;

        let mut state = self.shared.lock_state();
        if (board.move_count() + board.side_to_play()) % 2 != state.parity {
            return Err(EngineError::ParityMismatch);
        }
        if state.board == *board {
            return Ok(());
        }

        info!(
            "position updated, {} moves played, side {} to play",
            board.move_count(),
            board.side_to_play()
        );
        state.board = *board;
        state.cancel_workers();
        state.position_updated = true;
        state.solution = decided_evaluation(board);
        state.best = None;
        state.heuristic_reached = 0;
        state.exact_reached = 0;
        state.idle = false;
        self.shared.notify();
        Ok(())
    }

    /// Blocks until `duration` has passed or the position is solved
    pub fn evaluate_for(&self, duration: Duration) -> Evaluation {
        let deadline = Instant::now() + duration;
        let mut state = self.shared.lock_state();
        state.deadline = Some(deadline);

        while state.solution.is_none() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            state = match self.shared.changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => {
                    error!("engine mutex was poisoned while waiting, attempting recovery");
                    poisoned.into_inner().0
                }
            };
        }

        state.deadline = None;
        state.current_evaluation()
    }

    /// Switches to `board` through [`Engine::update_position`], then blocks
    /// as [`Engine::evaluate_for`] does
    pub fn evaluate_position_for(&self, board: &Board, duration: Duration) -> Result<Evaluation, EngineError> {
        self.update_position(board)?;
        Ok(self.evaluate_for(duration))
    }

    /// Blocks until the heuristic worker has completed a pass at `depth`,
    /// the position is solved, or no further heuristic pass can be launched
    pub fn evaluate_until_depth(&self, depth: u8) -> Evaluation {
        let mut state = self.shared.lock_state();
        while state.solution.is_none()
            && state.heuristic_reached < depth
            && !state.heuristic_exhausted()
            && !state.idle
            && !state.suspended
        {
            state = wait_or_recover(&self.shared.changed, state);
        }
        state.current_evaluation()
    }

    /// Switches to `board` through [`Engine::update_position`], then blocks
    /// as [`Engine::evaluate_until_depth`] does
    pub fn evaluate_position_until_depth(&self, board: &Board, depth: u8) -> Result<Evaluation, EngineError> {
        self.update_position(board)?;
        Ok(self.evaluate_until_depth(depth))
    }

    /// True once the current position has a proven result
    pub fn is_solved(&self) -> bool {
        self.shared.lock_state().solution.is_some()
    }

    pub fn current_position(&self) -> Board {
        self.shared.lock_state().board
    }

    /// Caps the depth of heuristic passes, `None` lifts the cap. The exact
    /// worker keeps deepening until the position is proven.
    pub fn set_max_depth(&self, max_depth: Option<u8>) {
        let mut state = self.shared.lock_state();
        state.max_depth = max_depth;
        state.idle = false;
        self.shared.notify();
    }

    /// Last completed depth of the heuristic and exact workers
    pub fn searched_depths(&self) -> (u8, u8) {
        let state = self.shared.lock_state();
        (state.heuristic_reached, state.exact_reached)
    }

    /// Looks any board up in the shared heuristic tables
    pub fn position_evaluation(&self, board: &Board) -> Option<Evaluation> {
        if board.is_invalid() {
            return Some(Evaluation::invalid());
        }
        self.shared
            .heuristic_tables
            .get(board.move_count(), board.hash())
            .map(|entry| Evaluation::new(entry.eval, entry.order[0], entry.heu_depth))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock_state();
            state.terminate = true;
            state.cancel_workers();
            self.shared.notify();
        }
        if let Some(handle) = self.main_loop.take() {
            if handle.join().is_err() {
                error!("engine main loop panicked");
            }
        }
    }
}

fn join_worker(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        if handle.join().is_err() {
            error!("engine worker panicked");
        }
    }
}

fn main_loop(shared: Arc<Shared>) {
    let mut heuristic_handle: Option<JoinHandle<()>> = None;
    let mut exact_handle: Option<JoinHandle<()>> = None;

    let mut state = shared.lock_state();
    loop {
        if state.terminate {
            drop(state);
            join_worker(heuristic_handle.take());
            join_worker(exact_handle.take());
            shared.changed.notify_all();
            return;
        }

        // every cancellation path has already bumped the epoch, so the
        // stopped workers only need joining
        let must_stop = state.position_updated || (state.suspended && !state.paused);
        if must_stop && (heuristic_handle.is_some() || exact_handle.is_some()) {
            drop(state);
            join_worker(heuristic_handle.take());
            join_worker(exact_handle.take());
            state = shared.lock_state();
            continue;
        }

        if must_stop {
            state.heuristic_running = false;
            state.exact_running = false;
            state.heuristic_failed = false;
            state.exact_failed = false;
            state.token = Arc::new(AtomicBool::new(false));

            if state.position_updated {
                state.position_updated = false;
                shared.reset_depths(&mut state);
            }
            if state.suspended {
                debug!("engine suspended");
                state.paused = true;
                state.idle = true;
                shared.changed.notify_all();
            }
            continue;
        }

        if state.suspended {
            state = wait_or_recover(&shared.wake, state);
            continue;
        }
        if state.paused {
            debug!("engine resumed");
            state.paused = false;
            shared.changed.notify_all();
        }

        // reap finished passes
        if !state.heuristic_running {
            join_worker(heuristic_handle.take());
        }
        if !state.exact_running {
            join_worker(exact_handle.take());
        }

        if state.solution.is_none() {
            if heuristic_handle.is_none() && !state.heuristic_failed {
                heuristic_handle = launch(&shared, &mut state, Kind::Heuristic);
            }
            if exact_handle.is_none() && !state.exact_failed {
                exact_handle = launch(&shared, &mut state, Kind::Exact);
            }
        }

        let idle = state.solution.is_some() || (heuristic_handle.is_none() && exact_handle.is_none());
        if idle != state.idle {
            state.idle = idle;
            shared.changed.notify_all();
        }

        state = wait_or_recover(&shared.wake, state);
    }
}

/// Spawns the next pass of `kind` if it has depth left to search
fn launch(shared: &Arc<Shared>, state: &mut State, kind: Kind) -> Option<JoinHandle<()>> {
    let board = state.board;
    let depth = match kind {
        Kind::Heuristic => state.heuristic_depth,
        Kind::Exact => state.exact_depth,
    };
    let capped = kind == Kind::Heuristic && !state.within_max_depth(depth);
    if depth == 0 || depth > board.remaining() || capped {
        return None;
    }

    // only heuristic passes take scheduled parameters
    let params = match kind {
        Kind::Heuristic => Some(shared.params(state, depth)),
        Kind::Exact => None,
    };
    let token = Arc::clone(&state.token);
    let epoch = state.epoch;
    let worker_shared = Arc::clone(shared);

    let name = match kind {
        Kind::Heuristic => "connect4-heuristic",
        Kind::Exact => "connect4-exact",
    };
    let spawned = thread::Builder::new().name(name.into()).spawn(move || {
        trace!("{:?} pass at depth {} started", kind, depth);
        let result = match params {
            Some(params) => heuristic_pass(&worker_shared, &board, depth, params, &token),
            None => exact_pass(&worker_shared, &board, depth, &token),
        };
        let result = match result {
            PassResult::Solved(evaluation) if evaluation.is_forced() => {
                forced_path(&worker_shared, &board, evaluation, &token)
            }
            other => other,
        };
        finish(&worker_shared, kind, epoch, depth, result);
    });

    match spawned {
        Ok(handle) => {
            match kind {
                Kind::Heuristic => state.heuristic_running = true,
                Kind::Exact => state.exact_running = true,
            }
            Some(handle)
        }
        Err(err) => {
            warn!("failed to spawn {:?} worker: {}", kind, err);
            match kind {
                Kind::Heuristic => state.heuristic_failed = true,
                Kind::Exact => state.exact_failed = true,
            }
            None
        }
    }
}

fn heuristic_pass(
    shared: &Shared,
    board: &Board,
    depth: u8,
    params: SearchParams,
    token: &AtomicBool,
) -> PassResult {
    let mut exact_tables = lock_or_recover(&shared.heuristic_exact);
    if let Err(err) = exact_tables.prepare(board.move_count()) {
        return PassResult::Failed(err);
    }

    let mut root = *board;
    let eval = HeuristicSolver::new(&shared.heuristic_tables, &mut exact_tables, params)
        .with_stop(token)
        .heuristic_tree(&mut root, LOSS_EVAL, WIN_EVAL, depth);
    if token.load(Ordering::Relaxed) {
        return PassResult::Cancelled;
    }

    let column = shared
        .heuristic_tables
        .get(board.move_count(), board.hash())
        .map_or(DEFAULT_COLUMN, |entry| entry.order[0]);
    let evaluation = Evaluation::new(eval, column, depth);
    if is_terminal(eval) {
        PassResult::Solved(evaluation)
    } else {
        PassResult::Completed(Some(evaluation))
    }
}

fn exact_pass(shared: &Shared, board: &Board, depth: u8, token: &AtomicBool) -> PassResult {
    let mut tables = lock_or_recover(&shared.exact_tables);
    if let Err(err) = tables.prepare(board.move_count()) {
        return PassResult::Failed(err);
    }

    let mut root = *board;
    let score = ExactSolver::new(&mut tables)
        .with_stop(token)
        .with_publishing(&shared.heuristic_tables, shared.config.publish_threshold)
        .exact_tree(&mut root, LOSS, WIN, depth);
    if token.load(Ordering::Relaxed) {
        return PassResult::Cancelled;
    }

    let column = retrieve_column(board, &tables).unwrap_or(DEFAULT_COLUMN);
    if score != DRAW {
        PassResult::Solved(Evaluation::new(score as f32, column, depth))
    } else if depth >= board.remaining() {
        // nothing is forced all the way to a full board
        PassResult::Solved(Evaluation::new(0.0, column, depth))
    } else {
        PassResult::Completed(None)
    }
}

/// Replaces a forced result's column and depth by the fastest win or the
/// slowest loss
fn forced_path(shared: &Shared, board: &Board, evaluation: Evaluation, token: &AtomicBool) -> PassResult {
    let target: Score = if evaluation.eval > 0.0 { WIN } else { LOSS };
    match find_best_path(board, target, Some(token), shared.config.scratch_entries) {
        Ok(Some(path)) => PassResult::Solved(Evaluation::new(evaluation.eval, path.column, path.depth)),
        Ok(None) => PassResult::Cancelled,
        Err(err) => PassResult::Failed(err),
    }
}

fn finish(shared: &Shared, kind: Kind, epoch: u64, depth: u8, result: PassResult) {
    let mut state = shared.lock_state();
    if state.epoch != epoch {
        return;
    }

    match kind {
        Kind::Heuristic => state.heuristic_running = false,
        Kind::Exact => state.exact_running = false,
    }

    match result {
        PassResult::Completed(evaluation) => {
            debug!("{:?} pass at depth {} completed", kind, depth);
            match kind {
                Kind::Heuristic => {
                    state.best = evaluation;
                    state.heuristic_reached = depth;
                    state.heuristic_depth = depth + 1;
                }
                Kind::Exact => {
                    state.exact_reached = depth;
                    state.exact_depth = depth + 1;
                }
            }
        }
        PassResult::Solved(evaluation) => {
            if state.solution.is_none() {
                info!(
                    "{:?} worker solved the position: {:?}, column {}, depth {}",
                    kind, evaluation.flag, evaluation.best_column, evaluation.depth
                );
                if evaluation.is_forced() {
                    shared.heuristic_tables.record_solution(
                        state.board.move_count(),
                        state.board.hash(),
                        evaluation.eval,
                        evaluation.best_column,
                        evaluation.depth,
                    );
                }
                state.solution = Some(evaluation);
                // the other worker has nothing left to find
                state.token.store(true, Ordering::Relaxed);
            }
        }
        PassResult::Cancelled => {}
        PassResult::Failed(err) => {
            error!("{:?} pass at depth {} failed: {}", kind, depth, err);
            match kind {
                Kind::Heuristic => state.heuristic_failed = true,
                Kind::Exact => state.exact_failed = true,
            }
        }
    }
    shared.notify();
}
