//! Pieces module - piece identity, movement templates, and the piece catalog
//!
//! A piece carries a unique name (`"white_pawn_e"`), its color and kind, the
//! movement template it was given by the catalog, and a `moved` flag used for
//! castling and pawn double-step eligibility.
//!
//! Pawn movement depends on color and occupancy, so the move generator and the
//! check detector special-case pawns; their template only records the forward
//! step.

use std::fmt;

use crate::types::{Color, PieceKind, Step, Tile};

/// Orthogonal sliding directions
pub const ROOK_STEPS: [Step; 4] = [
    Step::slide(-1, 0),
    Step::slide(0, 1),
    Step::slide(1, 0),
    Step::slide(0, -1),
];

/// Diagonal sliding directions
pub const BISHOP_STEPS: [Step; 4] = [
    Step::slide(-1, -1),
    Step::slide(-1, 1),
    Step::slide(1, 1),
    Step::slide(1, -1),
];

pub const QUEEN_STEPS: [Step; 8] = [
    Step::slide(-1, 0),
    Step::slide(-1, 1),
    Step::slide(0, 1),
    Step::slide(1, 1),
    Step::slide(1, 0),
    Step::slide(1, -1),
    Step::slide(0, -1),
    Step::slide(-1, -1),
];

pub const KING_STEPS: [Step; 8] = [
    Step::once(-1, 0),
    Step::once(-1, 1),
    Step::once(0, 1),
    Step::once(1, 1),
    Step::once(1, 0),
    Step::once(1, -1),
    Step::once(0, -1),
    Step::once(-1, -1),
];

pub const KNIGHT_STEPS: [Step; 8] = [
    Step::once(-2, -1),
    Step::once(-2, 1),
    Step::once(-1, 2),
    Step::once(1, 2),
    Step::once(2, 1),
    Step::once(2, -1),
    Step::once(1, -2),
    Step::once(-1, -2),
];

const WHITE_PAWN_STEPS: [Step; 1] = [Step::once(-1, 0)];
const BLACK_PAWN_STEPS: [Step; 1] = [Step::once(1, 0)];

/// Supplies movement templates and visual identifiers per piece kind.
///
/// Consulted when a match is created and when a pawn promotes; the returned
/// data is treated as read-only configuration.
pub trait PieceCatalog: fmt::Debug + Send + Sync {
    fn movement(&self, color: Color, kind: PieceKind) -> &'static [Step];

    fn visual(&self, color: Color, kind: PieceKind) -> &'static str;
}

/// Orthodox chess movement with `"<color>_<kind>"` visuals.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCatalog;

impl PieceCatalog for StandardCatalog {
    fn movement(&self, color: Color, kind: PieceKind) -> &'static [Step] {
        match kind {
            PieceKind::King => &KING_STEPS,
            PieceKind::Queen => &QUEEN_STEPS,
            PieceKind::Rook => &ROOK_STEPS,
            PieceKind::Bishop => &BISHOP_STEPS,
            PieceKind::Knight => &KNIGHT_STEPS,
            PieceKind::Pawn => match color {
                Color::White => &WHITE_PAWN_STEPS,
                Color::Black => &BLACK_PAWN_STEPS,
            },
        }
    }

    fn visual(&self, color: Color, kind: PieceKind) -> &'static str {
        match (color, kind) {
            (Color::White, PieceKind::King) => "white_king",
            (Color::White, PieceKind::Queen) => "white_queen",
            (Color::White, PieceKind::Rook) => "white_rook",
            (Color::White, PieceKind::Bishop) => "white_bishop",
            (Color::White, PieceKind::Knight) => "white_knight",
            (Color::White, PieceKind::Pawn) => "white_pawn",
            (Color::Black, PieceKind::King) => "black_king",
            (Color::Black, PieceKind::Queen) => "black_queen",
            (Color::Black, PieceKind::Rook) => "black_rook",
            (Color::Black, PieceKind::Bishop) => "black_bishop",
            (Color::Black, PieceKind::Knight) => "black_knight",
            (Color::Black, PieceKind::Pawn) => "black_pawn",
        }
    }
}

/// A piece on (or formerly on) the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    name: String,
    color: Color,
    kind: PieceKind,
    tile: Tile,
    moved: bool,
    movement: &'static [Step],
    visual: &'static str,
}

impl Piece {
    pub fn new(
        name: impl Into<String>,
        color: Color,
        kind: PieceKind,
        tile: Tile,
        catalog: &dyn PieceCatalog,
    ) -> Self {
        Self {
            name: name.into(),
            color,
            kind,
            tile,
            moved: false,
            movement: catalog.movement(color, kind),
            visual: catalog.visual(color, kind),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn kind(&self) -> PieceKind {
        self.kind
    }

    pub fn tile(&self) -> Tile {
        self.tile
    }

    pub fn has_moved(&self) -> bool {
        self.moved
    }

    pub fn movement(&self) -> &'static [Step] {
        self.movement
    }

    pub fn visual(&self) -> &'static str {
        self.visual
    }

    pub fn is_king(&self) -> bool {
        self.kind == PieceKind::King
    }

    pub fn is_pawn(&self) -> bool {
        self.kind == PieceKind::Pawn
    }

    /// Builder used when reconstructing a position mid-game
    pub fn with_moved(mut self, moved: bool) -> Self {
        self.moved = moved;
        self
    }

    /// Whether this piece's template reaches a square `distance` steps away
    /// along `(d_row, d_col)`. Pawns are handled by the callers.
    pub fn reaches(&self, d_row: i8, d_col: i8, distance: u8) -> bool {
        self.movement
            .iter()
            .any(|s| s.d_row == d_row && s.d_col == d_col && (s.repeat || distance == 1))
    }

    pub(crate) fn set_tile(&mut self, tile: Tile) {
        self.tile = tile;
    }

    pub(crate) fn set_moved(&mut self, moved: bool) {
        self.moved = moved;
    }

    /// Replace kind, template, and visual; the name survives promotion.
    pub(crate) fn promote(&mut self, kind: PieceKind, catalog: &dyn PieceCatalog) {
        self.kind = kind;
        self.movement = catalog.movement(self.color, kind);
        self.visual = catalog.visual(self.color, kind);
        self.moved = true;
    }
}

const BACK_ROW: [PieceKind; 8] = [
    PieceKind::Rook,
    PieceKind::Knight,
    PieceKind::Bishop,
    PieceKind::Queen,
    PieceKind::King,
    PieceKind::Bishop,
    PieceKind::Knight,
    PieceKind::Rook,
];

/// Starting placement for a fresh game.
///
/// Kings and queens are named `"<color>_<kind>"`; every other piece carries
/// its starting file, e.g. `"white_rook_h"` or `"black_pawn_d"`.
pub fn standard_layout(catalog: &dyn PieceCatalog) -> Vec<Piece> {
    let mut pieces = Vec::with_capacity(32);
    for color in Color::ALL {
        let (back, pawns) = match color {
            Color::White => (7u8, 6u8),
            Color::Black => (0u8, 1u8),
        };
        for (col, kind) in BACK_ROW.iter().copied().enumerate() {
            let col = col as u8;
            let Some(tile) = Tile::new(back, col) else {
                continue;
            };
            let name = match kind {
                PieceKind::King | PieceKind::Queen => format!("{}_{}", color, kind.as_str()),
                _ => format!("{}_{}_{}", color, kind.as_str(), tile.file()),
            };
            pieces.push(Piece::new(name, color, kind, tile, catalog));
        }
        for col in 0..8u8 {
            let Some(tile) = Tile::new(pawns, col) else {
                continue;
            };
            let name = format!("{}_pawn_{}", color, tile.file());
            pieces.push(Piece::new(name, color, PieceKind::Pawn, tile, catalog));
        }
    }
    pieces
}
