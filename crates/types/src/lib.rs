//! Core types module - shared data structures and constants
//!
//! This module defines the fundamental types used throughout the application.
//! All types are pure data structures with no external dependencies, making them
//! usable in any context (rules engine, network relay, local runner).
//!
//! # Board Geometry
//!
//! The board is an 8x8 grid addressed by `(row, col)`:
//!
//! - **Row 0** is rank 8 (Black's back row), **row 7** is rank 1 (White's back row)
//! - **Col 0** is file `a`, **col 7** is file `h`
//! - Tile names are written rank-first: `"2e"` is the white king's pawn square
//!
//! White pawns advance toward row 0, Black pawns toward row 7.
//!
//! # Match Defaults
//!
//! | Constant | Value | Description |
//! |----------|-------|-------------|
//! | `DEFAULT_CLOCK_SECS` | 600 | Starting time per side |
//! | `DEFAULT_INCREMENT_SECS` | 0 | Time added to the mover after each turn |
//! | `FIFTY_MOVE_LIMIT` | 50 | Plies without a capture before a forced draw |
//! | `REPETITION_LIMIT` | 3 | Occurrences of one position before a draw |
//! | `CLOCK_TICK_MS` | 1000 | Clock driver interval |
//! | `DEFAULT_SCALE` | 80 | Pixels per tile for positional payloads |
//! | `MAX_SCALE` | 4096 | Largest multiplier a client may request |
//! | `RECONNECT_GRACE_SECS` | 30 | Time a dropped player has to rejoin |
//!
//! # Examples
//!
//! ```
//! use chess_live_types::{Color, PieceKind, Tile};
//!
//! let tile = Tile::from_name("2e").unwrap();
//! assert_eq!(tile.row(), 6);
//! assert_eq!(tile.col(), 4);
//! assert_eq!(tile.to_string(), "2e");
//!
//! // Rank-file and file-rank spellings are both accepted.
//! assert_eq!(Tile::from_name("e2"), Some(tile));
//!
//! assert_eq!(Color::White.opposite(), Color::Black);
//! assert_eq!(PieceKind::from_str("Queen"), Some(PieceKind::Queen));
//! ```

use std::fmt;

/// Side length of the board
pub const BOARD_SIDE: u8 = 8;

/// Total number of tiles
pub const TILE_COUNT: usize = 64;

/// Starting time per side in seconds
pub const DEFAULT_CLOCK_SECS: u32 = 600;

/// Increment added to the mover's clock after each completed turn
pub const DEFAULT_INCREMENT_SECS: u32 = 0;

/// Plies without a capture that force a draw
pub const FIFTY_MOVE_LIMIT: u16 = 50;

/// Occurrences of the same position that force a draw
pub const REPETITION_LIMIT: u8 = 3;

/// Interval of the per-match clock driver
pub const CLOCK_TICK_MS: u64 = 1000;

/// Default pixel multiplier applied to grid coordinates
pub const DEFAULT_SCALE: u32 = 80;

/// Largest pixel multiplier a client may ask for
pub const MAX_SCALE: u32 = 4096;

/// Seconds a disconnected player has to rejoin before forfeiting
pub const RECONNECT_GRACE_SECS: u32 = 30;

/// Tile names indexed by `[row][col]`; row 0 is rank 8.
const TILE_NAMES: [[&str; 8]; 8] = [
    ["8a", "8b", "8c", "8d", "8e", "8f", "8g", "8h"],
    ["7a", "7b", "7c", "7d", "7e", "7f", "7g", "7h"],
    ["6a", "6b", "6c", "6d", "6e", "6f", "6g", "6h"],
    ["5a", "5b", "5c", "5d", "5e", "5f", "5g", "5h"],
    ["4a", "4b", "4c", "4d", "4e", "4f", "4g", "4h"],
    ["3a", "3b", "3c", "3d", "3e", "3f", "3g", "3h"],
    ["2a", "2b", "2c", "2d", "2e", "2f", "2g", "2h"],
    ["1a", "1b", "1c", "1d", "1e", "1f", "1g", "1h"],
];

/// Player color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub const ALL: [Color; 2] = [Color::White, Color::Black];

    pub fn opposite(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// Row delta of a pawn step for this color
    pub fn forward(self) -> i8 {
        match self {
            Color::White => -1,
            Color::Black => 1,
        }
    }

    /// Row a pawn of this color promotes on
    pub fn promotion_row(self) -> u8 {
        match self {
            Color::White => 0,
            Color::Black => BOARD_SIDE - 1,
        }
    }

    /// Stable index for per-color arrays
    pub fn index(self) -> usize {
        match self {
            Color::White => 0,
            Color::Black => 1,
        }
    }

    /// Parse color from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "white" | "w" => Some(Color::White),
            "black" | "b" => Some(Color::Black),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Color::White => "white",
            Color::Black => "black",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The six chess piece kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PieceKind {
    King,
    Queen,
    Rook,
    Bishop,
    Knight,
    Pawn,
}

impl PieceKind {
    /// Kinds a pawn may promote to, strongest first
    pub const PROMOTIONS: [PieceKind; 4] = [
        PieceKind::Queen,
        PieceKind::Rook,
        PieceKind::Bishop,
        PieceKind::Knight,
    ];

    /// Parse piece kind from string (case-insensitive)
    ///
    /// # Examples
    ///
    /// ```
    /// use chess_live_types::PieceKind;
    ///
    /// assert_eq!(PieceKind::from_str("knight"), Some(PieceKind::Knight));
    /// assert_eq!(PieceKind::from_str("N"), Some(PieceKind::Knight));
    /// assert_eq!(PieceKind::from_str("unknown"), None);
    /// ```
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "king" | "k" => Some(PieceKind::King),
            "queen" | "q" => Some(PieceKind::Queen),
            "rook" | "r" => Some(PieceKind::Rook),
            "bishop" | "b" => Some(PieceKind::Bishop),
            "knight" | "n" => Some(PieceKind::Knight),
            "pawn" | "p" => Some(PieceKind::Pawn),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PieceKind::King => "king",
            PieceKind::Queen => "queen",
            PieceKind::Rook => "rook",
            PieceKind::Bishop => "bishop",
            PieceKind::Knight => "knight",
            PieceKind::Pawn => "pawn",
        }
    }

    /// Single-letter notation used in move records
    pub fn letter(self) -> char {
        match self {
            PieceKind::King => 'k',
            PieceKind::Queen => 'q',
            PieceKind::Rook => 'r',
            PieceKind::Bishop => 'b',
            PieceKind::Knight => 'n',
            PieceKind::Pawn => 'p',
        }
    }

    pub fn is_minor(self) -> bool {
        matches!(self, PieceKind::Bishop | PieceKind::Knight)
    }
}

/// One of the 64 board cells.
///
/// Always constructed through the fixed lookup table, so a `Tile` value is
/// in bounds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tile {
    row: u8,
    col: u8,
}

impl Tile {
    /// Create a tile from grid coordinates
    /// Returns None if out of bounds
    pub const fn new(row: u8, col: u8) -> Option<Self> {
        if row < BOARD_SIDE && col < BOARD_SIDE {
            Some(Self { row, col })
        } else {
            None
        }
    }

    /// Inverse of [`Tile::index`]
    pub fn from_index(index: usize) -> Option<Self> {
        if index >= TILE_COUNT {
            return None;
        }
        Self::new((index / 8) as u8, (index % 8) as u8)
    }

    /// Parse a tile name (case-insensitive)
    ///
    /// Accepts rank-first (`"2e"`) and file-first (`"e2"`) spellings.
    pub fn from_name(name: &str) -> Option<Self> {
        let bytes = name.trim().as_bytes();
        if bytes.len() != 2 {
            return None;
        }
        let (rank, file) = match (bytes[0], bytes[1]) {
            (r @ b'1'..=b'8', f) if f.is_ascii_alphabetic() => (r, f),
            (f, r @ b'1'..=b'8') if f.is_ascii_alphabetic() => (r, f),
            _ => return None,
        };
        let file = file.to_ascii_lowercase();
        if !(b'a'..=b'h').contains(&file) {
            return None;
        }
        Self::new(b'8' - rank, file - b'a')
    }

    /// Every tile in row-major order starting at `"8a"`
    pub fn all() -> impl Iterator<Item = Tile> {
        (0..TILE_COUNT).filter_map(Tile::from_index)
    }

    /// Flat index in row-major order (row * 8 + col)
    #[inline(always)]
    pub fn index(self) -> usize {
        self.row as usize * BOARD_SIDE as usize + self.col as usize
    }

    pub fn row(self) -> u8 {
        self.row
    }

    pub fn col(self) -> u8 {
        self.col
    }

    /// Rank number 1..=8
    pub fn rank(self) -> u8 {
        BOARD_SIDE - self.row
    }

    /// File letter `a`..=`h`
    pub fn file(self) -> char {
        (b'a' + self.col) as char
    }

    pub fn name(self) -> &'static str {
        TILE_NAMES[self.row as usize][self.col as usize]
    }

    /// Light squares have an even coordinate sum (`"8a"` is light, `"1a"` is dark)
    pub fn is_light(self) -> bool {
        (self.row + self.col) % 2 == 0
    }

    /// Tile reached by stepping `(d_row, d_col)`
    /// Returns None if the step leaves the board
    #[inline]
    pub fn offset(self, d_row: i8, d_col: i8) -> Option<Self> {
        let row = self.row as i8 + d_row;
        let col = self.col as i8 + d_col;
        if row < 0 || col < 0 {
            return None;
        }
        Self::new(row as u8, col as u8)
    }

    /// Pixel offsets `(top, left)` for a recipient's coordinate multiplier
    pub fn scaled(self, scale: u32) -> (u32, u32) {
        (
            u32::from(self.row).saturating_mul(scale),
            u32::from(self.col).saturating_mul(scale),
        )
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One movement direction of a piece template.
///
/// `repeat` marks sliding directions; otherwise the piece moves a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Step {
    pub d_row: i8,
    pub d_col: i8,
    pub repeat: bool,
}

impl Step {
    pub const fn once(d_row: i8, d_col: i8) -> Self {
        Self {
            d_row,
            d_col,
            repeat: false,
        }
    }

    pub const fn slide(d_row: i8, d_col: i8) -> Self {
        Self {
            d_row,
            d_col,
            repeat: true,
        }
    }
}

/// Final result of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameResult {
    WhiteWins,
    BlackWins,
    Draw,
}

impl GameResult {
    /// Decisive result in favour of `winner`
    pub fn win_for(winner: Color) -> Self {
        match winner {
            Color::White => GameResult::WhiteWins,
            Color::Black => GameResult::BlackWins,
        }
    }

    pub fn winner(self) -> Option<Color> {
        match self {
            GameResult::WhiteWins => Some(Color::White),
            GameResult::BlackWins => Some(Color::Black),
            GameResult::Draw => None,
        }
    }

    /// Human-readable result string
    pub fn as_str(self) -> &'static str {
        match self {
            GameResult::WhiteWins => "white wins",
            GameResult::BlackWins => "black wins",
            GameResult::Draw => "draw",
        }
    }

    /// Score notation (`"1-0"`, `"0-1"`, `"1/2-1/2"`)
    pub fn score(self) -> &'static str {
        match self {
            GameResult::WhiteWins => "1-0",
            GameResult::BlackWins => "0-1",
            GameResult::Draw => "1/2-1/2",
        }
    }
}

/// Why a match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndReason {
    Checkmate,
    Stalemate,
    FiftyMoves,
    InsufficientMaterial,
    Repetition,
    Resignation,
    TimeForfeit,
    Disconnect,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Checkmate => "checkmate",
            EndReason::Stalemate => "stalemate",
            EndReason::FiftyMoves => "fifty_moves",
            EndReason::InsufficientMaterial => "insufficient_material",
            EndReason::Repetition => "repetition",
            EndReason::Resignation => "resignation",
            EndReason::TimeForfeit => "time_forfeit",
            EndReason::Disconnect => "disconnect",
        }
    }
}

/// Terminal state of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GameOver {
    pub result: GameResult,
    pub reason: EndReason,
}

impl GameOver {
    pub fn draw(reason: EndReason) -> Self {
        Self {
            result: GameResult::Draw,
            reason,
        }
    }

    /// `loser` loses for `reason`
    pub fn loss(loser: Color, reason: EndReason) -> Self {
        Self {
            result: GameResult::win_for(loser.opposite()),
            reason,
        }
    }
}

/// Per-match rule and clock settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchConfig {
    pub clock_secs: u32,
    pub increment_secs: u32,
    pub fifty_move_limit: u16,
    pub repetition_limit: u8,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            clock_secs: DEFAULT_CLOCK_SECS,
            increment_secs: DEFAULT_INCREMENT_SECS,
            fifty_move_limit: FIFTY_MOVE_LIMIT,
            repetition_limit: REPETITION_LIMIT,
        }
    }
}

impl MatchConfig {
    /// Parse a `base+increment` time control in seconds, e.g. `"600+5"`
    ///
    /// A bare number is taken as the base with no increment.
    ///
    /// ```
    /// use chess_live_types::MatchConfig;
    ///
    /// let cfg = MatchConfig::from_time_control("300+2").unwrap();
    /// assert_eq!((cfg.clock_secs, cfg.increment_secs), (300, 2));
    /// assert!(MatchConfig::from_time_control("fast").is_none());
    /// ```
    pub fn from_time_control(s: &str) -> Option<Self> {
        let (base, inc) = match s.trim().split_once('+') {
            Some((b, i)) => (b.trim().parse().ok()?, i.trim().parse().ok()?),
            None => (s.trim().parse().ok()?, 0),
        };
        if base == 0 {
            return None;
        }
        Some(Self {
            clock_secs: base,
            increment_secs: inc,
            ..Self::default()
        })
    }
}
