//! A position-solving engine for the board game 'Connect 4' on an 8x8 board
//!
//! The engine proves forced wins and losses with an exact game tree search
//! and, while no proof is in reach, keeps a bounded heuristic evaluation and
//! best move up to date. Both searches run continuously in the background and
//! can be suspended, resumed or pointed at a new position at any time.
//!
//! # Basic Usage
//!
//! ```
//! use connect4_engine::{bitboard::Board, engine::{Engine, EvalFlag}};
//! use std::time::Duration;
//!
//!# use std::error::Error;
//!# fn main() -> Result<(), Box<dyn Error>> {
//! // the first player has three in the bottom row and is to move
//! let board = Board::from_moves("112233")?;
//! let engine = Engine::new(Some(board), false)?;
//! let evaluation = engine.evaluate_for(Duration::from_secs(5));
//!
//! assert_eq!(evaluation.flag, EvalFlag::CurrentPlayerWin);
//! assert_eq!(evaluation.best_column, 3);
//!# Ok(())
//!# }
//! ```
//!
//! One-shot solving without the background engine is available through
//! [`solver::solve_board`] and [`heuristic_solver::evaluate_board`].

use static_assertions::*;
pub use anyhow;

pub mod zobrist;

pub mod bitboard;

pub mod error;

pub mod transposition_table;

pub mod heuristic_table;

pub mod solver;

pub mod path_finder;

pub mod heuristic;

pub mod heuristic_solver;

pub mod scheduler;

pub mod config;

pub mod engine;


pub use bitboard::Board;
pub use config::{EngineConfig, SearchParams};
pub use engine::{Engine, EvalFlag, Evaluation};
pub use error::{BoardError, EngineError};

/// The width of the game board in tiles
pub const WIDTH: usize = 8;

/// The height of the game board in tiles
pub const HEIGHT: usize = 8;

/// The number of cells on the board
pub const CELLS: usize = WIDTH * HEIGHT;

// every cell gets its own bit in a u64, with no sentinel row
const_assert!(WIDTH * HEIGHT <= 64);
const_assert!(WIDTH <= 9);

/// Exact game-theoretic value for the side to move
pub type Score = i8;

pub const WIN: Score = 1;
pub const DRAW: Score = 0;
pub const LOSS: Score = -1;
/// Below every real score, used to seed a running maximum
pub const INVALID: Score = -2;

/// Heuristic evaluations live in `[LOSS_EVAL, WIN_EVAL]`, the end points
/// reserved for proven results
pub const WIN_EVAL: f32 = 1.0;
pub const LOSS_EVAL: f32 = -1.0;

/// Width of the null window used by the principal variation search
pub const EVAL_EPSILON: f32 = 1e-6;
