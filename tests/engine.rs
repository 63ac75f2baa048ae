use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use connect4_engine::engine::NO_COLUMN;
use connect4_engine::scheduler::{Features, FixedScheduler, Schedule, Scheduler};
use connect4_engine::{Board, BoardError, Engine, EngineConfig, EngineError, EvalFlag, HEIGHT, WIDTH};

fn small_engine(board: Option<Board>, start_suspended: bool) -> Result<Engine, EngineError> {
    let config = EngineConfig::default()
        .with_table_entries(1 << 10)
        .with_scratch_entries(1 << 8);
    Engine::with_config(
        board,
        start_suspended,
        config,
        Box::new(FixedScheduler::new(config.search)),
    )
}

/// Fixed parameters, counting how often the engine asks for them
struct CountingScheduler {
    inner: FixedScheduler,
    calls: Arc<AtomicUsize>,
}

impl Scheduler for CountingScheduler {
    fn schedule(&self, features: &Features) -> Schedule {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.schedule(features)
    }
}

#[test]
fn solves_a_win_in_one() -> Result<()> {
    // the first player has three stacked in the fourth column
    let board = Board::from_moves("414243")?;
    let engine = small_engine(Some(board), false)?;

    let evaluation = engine.evaluate_for(Duration::from_secs(30));
    assert_eq!(evaluation.flag, EvalFlag::CurrentPlayerWin);
    assert_eq!(evaluation.best_column, 3);
    assert_eq!(evaluation.depth, 1);
    assert!(engine.is_solved());

    let stored = engine
        .position_evaluation(&board)
        .ok_or_else(|| anyhow!("solution not published"))?;
    assert_eq!(stored.flag, EvalFlag::CurrentPlayerWin);
    Ok(())
}

#[test]
fn solves_a_loss_in_two() -> Result<()> {
    let engine = small_engine(Some(Board::from_moves("44553")?), false)?;
    let evaluation = engine.evaluate_for(Duration::from_secs(30));
    assert_eq!(evaluation.flag, EvalFlag::OtherPlayerWin);
    assert_eq!(evaluation.depth, 2);
    Ok(())
}

#[test]
fn decided_boards_are_solved_immediately() -> Result<()> {
    let engine = small_engine(Some(Board::from_moves("4142434")?), true)?;
    assert!(engine.is_solved());

    let evaluation = engine.evaluate_for(Duration::from_millis(0));
    assert_eq!(evaluation.flag, EvalFlag::OtherPlayerWin);
    assert_eq!(evaluation.best_column, NO_COLUMN);
    assert_eq!(evaluation.depth, 0);
    Ok(())
}

#[test]
fn rejects_invalid_boards() -> Result<()> {
    let board = Board::from_moves("44")?;
    let tampered = Board::from_parts(
        [board.bitboard(0), board.bitboard(1)],
        *board.heights(),
        board.move_count(),
        board.side_to_play(),
        board.hash() ^ 1,
    );

    assert!(matches!(
        small_engine(Some(tampered), true),
        Err(EngineError::InvalidBoard(BoardError::HashMismatch { .. }))
    ));

    let engine = small_engine(None, true)?;
    assert!(matches!(
        engine.update_position(&tampered),
        Err(EngineError::InvalidBoard(BoardError::HashMismatch { .. }))
    ));
    assert_eq!(engine.current_position(), Board::new());
    Ok(())
}

#[test]
fn keeps_side_to_move_parity() -> Result<()> {
    let engine = small_engine(None, true)?;

    let board = Board::from_moves("4")?;
    engine.update_position(&board)?;
    assert_eq!(engine.current_position(), board);

    // an empty board with the second player to move breaks the parity
    let shifted = Board::from_cells(&[[0; WIDTH]; HEIGHT], 1)?;
    assert!(matches!(
        engine.update_position(&shifted),
        Err(EngineError::ParityMismatch)
    ));
    assert_eq!(engine.current_position(), board);
    Ok(())
}

#[test]
fn suspend_and_resume() -> Result<()> {
    let engine = small_engine(None, true)?;

    // nothing runs while suspended
    let evaluation = engine.evaluate_until_depth(5);
    assert_eq!(evaluation.flag, EvalFlag::InvalidBoard);
    assert_eq!(engine.searched_depths(), (0, 0));

    engine.resume();
    let evaluation = engine.evaluate_until_depth(3);
    assert_ne!(evaluation.flag, EvalFlag::InvalidBoard);
    assert!(evaluation.depth >= 3);

    engine.suspend();
    engine.suspend();
    let (heuristic_depth, _) = engine.searched_depths();
    assert!(heuristic_depth >= 3);

    engine.resume();
    engine.resume();
    Ok(())
}

#[test]
fn max_depth_stops_the_heuristic_worker() -> Result<()> {
    let engine = small_engine(None, true)?;
    engine.set_max_depth(Some(4));
    engine.resume();

    // returns once no further heuristic pass fits under the cap
    let evaluation = engine.evaluate_until_depth(10);
    assert_eq!(evaluation.depth, 4);
    assert!(!evaluation.is_forced());
    assert_eq!(engine.searched_depths().0, 4);
    Ok(())
}

#[test]
fn max_depth_leaves_the_exact_worker_running() -> Result<()> {
    // the side to move wins in three with an open three on the bottom row,
    // deeper than any heuristic pass allowed here
    let board = Board::from_moves("4455")?;
    let config = EngineConfig::default()
        .with_table_entries(1 << 10)
        .with_scratch_entries(1 << 8);
    let calls = Arc::new(AtomicUsize::new(0));
    let scheduler = CountingScheduler {
        inner: FixedScheduler::new(config.search),
        calls: Arc::clone(&calls),
    };
    let engine = Engine::with_config(Some(board), true, config, Box::new(scheduler))?;
    engine.set_max_depth(Some(1));
    engine.resume();

    let evaluation = engine.evaluate_for(Duration::from_secs(30));
    assert_eq!(evaluation.flag, EvalFlag::CurrentPlayerWin);
    assert_eq!(evaluation.depth, 3);
    assert!(evaluation.best_column == 2 || evaluation.best_column == 5);
    assert_eq!(engine.searched_depths().0, 0);

    // exact passes take no scheduled parameters, only the initial depth reset asks
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn draws_report_an_open_column() -> Result<()> {
    // 63 pieces without a four, only the fifth column has room left
    let cells = [
        [2, 2, 1, 2, 2, 1, 2, 2],
        [2, 1, 2, 1, 2, 1, 1, 2],
        [1, 2, 2, 1, 1, 2, 2, 1],
        [1, 2, 1, 2, 2, 2, 1, 1],
        [1, 1, 1, 2, 1, 2, 2, 2],
        [2, 2, 1, 1, 2, 1, 1, 1],
        [1, 1, 2, 2, 1, 2, 2, 1],
        [2, 1, 1, 1, 0, 2, 1, 1],
    ];
    let board = Board::from_cells(&cells, 1)?;
    let engine = small_engine(Some(board), false)?;

    let evaluation = engine.evaluate_for(Duration::from_secs(30));
    assert!(engine.is_solved());
    assert_eq!(evaluation.flag, EvalFlag::Draw);
    assert_eq!(evaluation.best_column, 4);
    assert!(board.can_play(evaluation.best_column as usize));
    Ok(())
}

#[test]
fn position_updates_restart_the_search() -> Result<()> {
    let engine = small_engine(None, false)?;
    engine.evaluate_until_depth(3);

    let board = Board::from_moves("414243")?;
    let evaluation = engine.evaluate_position_for(&board, Duration::from_secs(30))?;
    assert_eq!(engine.current_position(), board);
    assert_eq!(evaluation.flag, EvalFlag::CurrentPlayerWin);
    assert_eq!(evaluation.best_column, 3);

    // the same position again changes nothing
    engine.update_position(&board)?;
    assert!(engine.is_solved());

    // moving on to a decided position
    let mut next = board;
    next.play_move(3);
    let evaluation = engine.evaluate_position_until_depth(&next, 5)?;
    assert_eq!(evaluation.flag, EvalFlag::OtherPlayerWin);
    assert_eq!(evaluation.best_column, NO_COLUMN);

    // a rejected position leaves the current one in place
    let shifted = Board::from_cells(&[[0; WIDTH]; HEIGHT], 1)?;
    assert!(matches!(
        engine.evaluate_position_for(&shifted, Duration::from_millis(0)),
        Err(EngineError::ParityMismatch)
    ));
    assert_eq!(engine.current_position(), next);
    Ok(())
}
