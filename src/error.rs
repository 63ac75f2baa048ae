//! Error types for boards and the engine

use thiserror::Error;

/// Reasons a board is rejected before it can reach any search
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("both players occupy the same cell")]
    OverlappingPieces,
    #[error("column {column} has height {height}, more than the board allows")]
    ColumnOverflow { column: usize, height: u8 },
    #[error("column {column} does not match its recorded height {height}")]
    HeightMismatch { column: usize, height: u8 },
    #[error("stored hash {stored:#018x} differs from the recomputed {expected:#018x}")]
    HashMismatch { stored: u64, expected: u64 },
    #[error("move count {move_count} differs from the {pieces} pieces on the board")]
    MoveCountMismatch { move_count: u8, pieces: u8 },
    #[error("side to play must be 0 or 1, got {0}")]
    InvalidSide(u8),
    #[error("invalid cell value {value} at row {row}, column {column}")]
    InvalidCell { row: usize, column: usize, value: u8 },
    #[error("could not parse '{0}' as a valid move")]
    InvalidMove(char),
    #[error("invalid move, column {0} full")]
    ColumnFull(usize),
    #[error("invalid position, game is over")]
    GameOver,
}

/// Errors surfaced by the engine and its collaborators
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid board: {0}")]
    InvalidBoard(#[from] BoardError),
    #[error("side to play does not match the parity of the game under evaluation")]
    ParityMismatch,
    #[error("failed to allocate a transposition table of {entries} entries")]
    TableAllocation { entries: usize },
    #[error("weight file error: {0}")]
    WeightFile(#[from] std::io::Error),
    #[error("weight file header mismatch: {0}")]
    WeightFormat(String),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(String),
}
