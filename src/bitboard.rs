use crate::error::BoardError;
use crate::zobrist::{INITIAL_HASH, ZOBRIST};
use crate::{CELLS, HEIGHT, WIDTH};

/// Bitmap helpers for an 8x8 board where bit `column * 8 + row` is one cell
pub mod masks {
    use crate::{HEIGHT, WIDTH};

    pub const fn column_mask(column: usize) -> u64 {
        ((1u64 << HEIGHT) - 1) << (column * HEIGHT)
    }

    pub const fn bottom_row() -> u64 {
        let mut mask = 0;
        let mut column = 0;
        while column < WIDTH {
            mask |= 1 << (column * HEIGHT);
            column += 1;
        }
        mask
    }

    /// Cells `(c, r)` whose cell at `(c - dc, r - dr)` is still on the board
    pub const fn offset_mask(dc: i32, dr: i32) -> u64 {
        let mut mask = 0;
        let mut column = 0;
        while column < WIDTH as i32 {
            let mut row = 0;
            while row < HEIGHT as i32 {
                let (c, r) = (column - dc, row - dr);
                if c >= 0 && c < WIDTH as i32 && r >= 0 && r < HEIGHT as i32 {
                    mask |= 1 << (column * HEIGHT as i32 + row);
                }
                row += 1;
            }
            column += 1;
        }
        mask
    }

    /// One line direction: the bit offset of a single step and, for every
    /// step count in -3..=3, the cells whose neighbour that far back exists
    pub struct Axis {
        pub delta: i32,
        pub steps: [u64; 7],
    }

    const fn axis(dc: i32, dr: i32) -> Axis {
        let mut steps = [0; 7];
        let mut k = -3;
        while k <= 3 {
            steps[(k + 3) as usize] = offset_mask(k * dc, k * dr);
            k += 1;
        }
        Axis {
            delta: dc * HEIGHT as i32 + dr,
            steps,
        }
    }

    pub const HORIZONTAL: Axis = axis(1, 0);
    pub const VERTICAL: Axis = axis(0, 1);
    pub const DIAGONAL_UP: Axis = axis(1, 1);
    pub const DIAGONAL_DOWN: Axis = axis(1, -1);

    pub const ALL_AXES: [Axis; 4] = [HORIZONTAL, VERTICAL, DIAGONAL_UP, DIAGONAL_DOWN];
    // a vertical three always has its hole directly playable, so it never
    // counts as a pending threat
    pub const THREAT_AXES: [Axis; 3] = [HORIZONTAL, DIAGONAL_UP, DIAGONAL_DOWN];

    impl Axis {
        /// Marks cell `i` when the cell `k` steps behind it along this axis is set
        #[inline]
        pub fn step(&self, bits: u64, k: i32) -> u64 {
            let offset = k * self.delta;
            let shifted = if offset >= 0 {
                bits << offset
            } else {
                bits >> -offset
            };
            shifted & self.steps[(k + 3) as usize]
        }
    }
}

use masks::{ALL_AXES, THREAT_AXES};

pub const BOTTOM_ROW: u64 = masks::bottom_row();

/// Returns the bit of a single cell
#[inline]
pub const fn bit_at(column: usize, row: usize) -> u64 {
    1 << (column * HEIGHT + row)
}

/// Returns true if the bitmap contains four in a row on any axis.
///
/// Each axis collapses the map onto itself: cells with a set neighbour one
/// step behind, then of those the cells with such a pair two steps behind.
/// The step masks drop anything that wrapped around an edge.
#[inline]
pub fn is_win(bitmap: u64) -> bool {
    ALL_AXES.iter().any(|axis| {
        let pairs = bitmap & axis.step(bitmap, 1);
        pairs & axis.step(pairs, 2) != 0
    })
}

/// Counts every four-cell line fully contained in the bitmap
#[inline]
pub fn count_lines(bitmap: u64) -> u32 {
    ALL_AXES
        .iter()
        .map(|axis| {
            let pairs = bitmap & axis.step(bitmap, 1);
            (pairs & axis.step(pairs, 2)).count_ones()
        })
        .sum()
}

/// Cells that would complete a horizontal or diagonal four for the bitmap's owner
pub fn winning_holes(bitmap: u64) -> u64 {
    let mut holes = 0;
    for axis in THREAT_AXES.iter() {
        let (l1, l2, l3) = (
            axis.step(bitmap, 1),
            axis.step(bitmap, 2),
            axis.step(bitmap, 3),
        );
        let (r1, r2, r3) = (
            axis.step(bitmap, -1),
            axis.step(bitmap, -2),
            axis.step(bitmap, -3),
        );
        // XXX_, XX_X, X_XX and _XXX
        holes |= (l1 & l2 & l3) | (l2 & l1 & r1) | (l1 & r1 & r2) | (r1 & r2 & r3);
    }
    holes
}

/// Shifts every cell one row up, dropping the top row
#[inline]
pub fn north(bits: u64) -> u64 {
    (bits << 1) & !BOTTOM_ROW
}

/// Every cell strictly above a set cell in the same column
pub fn fill_above(bits: u64) -> u64 {
    let mut fill = 0;
    let mut layer = bits;
    for _ in 1..HEIGHT {
        layer = north(layer);
        fill |= layer;
    }
    fill
}

/// A bit-packed Connect 4 position on an 8x8 board.
///
/// Each player's pieces live in their own bitmap, heights give the next free
/// row of each column (8 when full), and the Zobrist hash is kept up to date
/// on every move.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Board {
    bitboards: [u64; 2],
    hash: u64,
    heights: [u8; WIDTH],
    move_count: u8,
    side_to_play: u8,
}

impl Board {
    pub fn new() -> Self {
        Self {
            bitboards: [0, 0],
            hash: INITIAL_HASH,
            heights: [0; WIDTH],
            move_count: 0,
            side_to_play: 0,
        }
    }

    /// Builds a board from 1-based column digits, e.g. `"4453"`
    pub fn from_moves<S: AsRef<str>>(moves: S) -> Result<Self, BoardError> {
        let mut board = Self::new();

        for column_char in moves.as_ref().chars() {
            match column_char.to_digit(10).map(|c| c as usize) {
                Some(column @ 1..=WIDTH) => {
                    let column = column - 1;
                    if !board.can_play(column) {
                        return Err(BoardError::ColumnFull(column + 1));
                    }
                    // abort if the position is won at any point
                    if board.has_winner() {
                        return Err(BoardError::GameOver);
                    }
                    board.play_move(column);
                }
                _ => return Err(BoardError::InvalidMove(column_char)),
            }
        }
        Ok(board)
    }

    /// Builds a board from a grid of cells indexed `[row][column]`, row 0 at
    /// the bottom, holding 0 (empty), 1 (first player) or 2 (second player)
    pub fn from_cells(cells: &[[u8; WIDTH]; HEIGHT], side_to_play: u8) -> Result<Self, BoardError> {
        if side_to_play > 1 {
            return Err(BoardError::InvalidSide(side_to_play));
        }
        let mut bitboards = [0u64; 2];
        let mut heights = [0u8; WIDTH];
        let mut move_count = 0u8;

        for (row, cells_row) in cells.iter().enumerate() {
            for (column, &value) in cells_row.iter().enumerate() {
                match value {
                    0 => continue,
                    1 | 2 => bitboards[value as usize - 1] |= bit_at(column, row),
                    _ => return Err(BoardError::InvalidCell { row, column, value }),
                }
                heights[column] += 1;
                move_count += 1;
            }
        }

        let board = Self {
            bitboards,
            hash: ZOBRIST.full_hash(&bitboards),
            heights,
            move_count,
            side_to_play,
        };
        board.validate()?;
        Ok(board)
    }

    /// Assembles a board from raw parts without any checks
    pub fn from_parts(
        bitboards: [u64; 2],
        heights: [u8; WIDTH],
        move_count: u8,
        side_to_play: u8,
        hash: u64,
    ) -> Self {
        Self {
            bitboards,
            hash,
            heights,
            move_count,
            side_to_play,
        }
    }

    /// The inverse of [`Board::from_cells`]
    pub fn to_cells(&self) -> [[u8; WIDTH]; HEIGHT] {
        let mut cells = [[0; WIDTH]; HEIGHT];
        for (row, cells_row) in cells.iter_mut().enumerate() {
            for (column, cell) in cells_row.iter_mut().enumerate() {
                let bit = bit_at(column, row);
                if self.bitboards[0] & bit != 0 {
                    *cell = 1;
                } else if self.bitboards[1] & bit != 0 {
                    *cell = 2;
                }
            }
        }
        cells
    }

    #[inline]
    pub fn bitboard(&self, side: usize) -> u64 {
        self.bitboards[side]
    }

    /// Pieces of the side to play
    #[inline]
    pub fn player_bitboard(&self) -> u64 {
        self.bitboards[self.side_to_play as usize]
    }

    /// Pieces of the side that just moved
    #[inline]
    pub fn opponent_bitboard(&self) -> u64 {
        self.bitboards[self.side_to_play as usize ^ 1]
    }

    #[inline]
    pub fn occupied(&self) -> u64 {
        self.bitboards[0] | self.bitboards[1]
    }

    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    pub fn heights(&self) -> &[u8; WIDTH] {
        &self.heights
    }

    #[inline]
    pub fn move_count(&self) -> u8 {
        self.move_count
    }

    /// Plies left until the board is full
    #[inline]
    pub fn remaining(&self) -> u8 {
        CELLS as u8 - self.move_count
    }

    #[inline]
    pub fn side_to_play(&self) -> u8 {
        self.side_to_play
    }

    #[inline]
    pub fn can_play(&self, column: usize) -> bool {
        self.heights[column] as usize != HEIGHT
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.move_count as usize == CELLS
    }

    /// Would dropping a piece in `column` complete four for the side to play
    #[inline]
    pub fn winning_move(&self, column: usize) -> bool {
        is_win(self.player_bitboard() | bit_at(column, self.heights[column] as usize))
    }

    /// True if either player already has four in a row
    pub fn has_winner(&self) -> bool {
        is_win(self.bitboards[0]) || is_win(self.bitboards[1])
    }

    /// Drops a piece for the side to play. The column must be playable.
    #[inline]
    pub fn play_move(&mut self, column: usize) {
        let row = self.heights[column] as usize;
        self.heights[column] += 1;

        let side = self.side_to_play as usize;
        self.bitboards[side] |= bit_at(column, row);
        self.hash ^= ZOBRIST.key(side, column * HEIGHT + row);

        self.side_to_play ^= 1;
        self.move_count += 1;
    }

    /// Takes back the top piece of `column`, which must have been the last
    /// piece played by the previous side
    #[inline]
    pub fn undo_move(&mut self, column: usize) {
        self.side_to_play ^= 1;
        self.move_count -= 1;

        self.heights[column] -= 1;
        let row = self.heights[column] as usize;

        let side = self.side_to_play as usize;
        self.bitboards[side] ^= bit_at(column, row);
        self.hash ^= ZOBRIST.key(side, column * HEIGHT + row);
    }

    /// Checks the structural invariants of the board
    pub fn validate(&self) -> Result<(), BoardError> {
        if self.bitboards[0] & self.bitboards[1] != 0 {
            return Err(BoardError::OverlappingPieces);
        }
        if self.side_to_play > 1 {
            return Err(BoardError::InvalidSide(self.side_to_play));
        }

        let occupied = self.occupied();
        let mut pieces = 0u8;
        for (column, &height) in self.heights.iter().enumerate() {
            if height as usize > HEIGHT {
                return Err(BoardError::ColumnOverflow { column, height });
            }
            // pieces stack from the bottom without gaps
            let expected = ((1u64 << height) - 1) << (column * HEIGHT);
            if occupied & masks::column_mask(column) != expected {
                return Err(BoardError::HeightMismatch { column, height });
            }
            pieces += height;
        }

        if pieces != self.move_count {
            return Err(BoardError::MoveCountMismatch {
                move_count: self.move_count,
                pieces,
            });
        }

        let expected = ZOBRIST.full_hash(&self.bitboards);
        if self.hash != expected {
            return Err(BoardError::HashMismatch {
                stored: self.hash,
                expected,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn is_invalid(&self) -> bool {
        self.validate().is_err()
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}
