//! Move generation - pseudo-legal destinations per piece
//!
//! Respects occupancy, board bounds, and capture rules. King safety is left to
//! [`crate::check`]; the turn state machine filters these destinations through
//! it before anything is committed.

use arrayvec::ArrayVec;

use crate::board::{Board, PieceId};
use crate::pieces::Piece;
use crate::types::{Color, Tile, TILE_COUNT};

/// How a destination is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestinationKind {
    Quiet,
    Capture,
    /// Pawn's initial two-square advance; opens an en passant window
    DoubleStep,
    /// Diagonal onto the en passant target; the captured pawn sits on `victim`
    EnPassant { victim: Tile },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Destination {
    pub tile: Tile,
    pub kind: DestinationKind,
}

impl Destination {
    /// Tile whose occupant is removed by this move, if any
    pub fn captured_tile(&self) -> Option<Tile> {
        match self.kind {
            DestinationKind::Capture => Some(self.tile),
            DestinationKind::EnPassant { victim } => Some(victim),
            DestinationKind::Quiet | DestinationKind::DoubleStep => None,
        }
    }
}

/// En passant window opened by a double step.
///
/// Lives for exactly one ply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnPassant {
    /// Tile the double-stepping pawn skipped over
    pub target: Tile,
    /// Tile the double-stepping pawn landed on
    pub victim: Tile,
    /// Side allowed to capture
    pub capturer: Color,
}

impl EnPassant {
    /// Window for `capturer` onto `target`; the victim sits one step past it
    pub fn for_target(target: Tile, capturer: Color) -> Option<Self> {
        let victim = target.offset(capturer.opposite().forward(), 0)?;
        Some(Self {
            target,
            victim,
            capturer,
        })
    }
}

/// Destinations in generation order; use as a membership set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Destinations(ArrayVec<Destination, TILE_COUNT>);

impl Destinations {
    pub fn new() -> Self {
        Self(ArrayVec::new())
    }

    pub(crate) fn push(&mut self, dest: Destination) {
        if !self.contains(dest.tile) {
            self.0.push(dest);
        }
    }

    pub fn get(&self, tile: Tile) -> Option<Destination> {
        self.0.iter().copied().find(|d| d.tile == tile)
    }

    pub fn contains(&self, tile: Tile) -> bool {
        self.0.iter().any(|d| d.tile == tile)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Destination> {
        self.0.iter()
    }

    pub fn tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        self.0.iter().map(|d| d.tile)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn retain(&mut self, f: impl FnMut(&mut Destination) -> bool) {
        self.0.retain(f);
    }
}

impl FromIterator<Destination> for Destinations {
    fn from_iter<I: IntoIterator<Item = Destination>>(iter: I) -> Self {
        let mut out = Self::new();
        for d in iter {
            out.push(d);
        }
        out
    }
}

/// Pseudo-legal destinations for the piece `id`
pub fn destinations(board: &Board, id: PieceId, en_passant: Option<EnPassant>) -> Destinations {
    let mut out = Destinations::new();
    let Some(piece) = board.get(id) else {
        return out;
    };
    if piece.is_pawn() {
        pawn_destinations(board, piece, en_passant, &mut out);
    } else {
        template_destinations(board, piece, &mut out);
    }
    out
}

fn template_destinations(board: &Board, piece: &Piece, out: &mut Destinations) {
    for step in piece.movement() {
        let mut cursor = piece.tile();
        while let Some(next) = cursor.offset(step.d_row, step.d_col) {
            match board.piece_at(next) {
                None => out.push(Destination {
                    tile: next,
                    kind: DestinationKind::Quiet,
                }),
                Some(other) if other.color() == piece.color() => break,
                Some(_) => {
                    out.push(Destination {
                        tile: next,
                        kind: DestinationKind::Capture,
                    });
                    break;
                }
            }
            if !step.repeat {
                break;
            }
            cursor = next;
        }
    }
}

fn pawn_destinations(
    board: &Board,
    pawn: &Piece,
    en_passant: Option<EnPassant>,
    out: &mut Destinations,
) {
    let forward = pawn.color().forward();
    let from = pawn.tile();

    if let Some(one) = from.offset(forward, 0).filter(|t| board.is_empty(*t)) {
        out.push(Destination {
            tile: one,
            kind: DestinationKind::Quiet,
        });
        if !pawn.has_moved() {
            if let Some(two) = one.offset(forward, 0).filter(|t| board.is_empty(*t)) {
                out.push(Destination {
                    tile: two,
                    kind: DestinationKind::DoubleStep,
                });
            }
        }
    }

    for d_col in [-1, 1] {
        let Some(diag) = from.offset(forward, d_col) else {
            continue;
        };
        match board.piece_at(diag) {
            Some(other) if other.color() != pawn.color() => out.push(Destination {
                tile: diag,
                kind: DestinationKind::Capture,
            }),
            Some(_) => {}
            None => {
                if let Some(ep) = en_passant.filter(|ep| {
                    ep.target == diag
                        && ep.capturer == pawn.color()
                        && board.piece_at(ep.victim).is_some_and(|v| {
                            v.is_pawn() && v.color() != pawn.color()
                        })
                }) {
                    out.push(Destination {
                        tile: diag,
                        kind: DestinationKind::EnPassant { victim: ep.victim },
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pieces::{standard_layout, StandardCatalog};
    use crate::types::PieceKind;

    fn tile(name: &str) -> Tile {
        Tile::from_name(name).unwrap()
    }

    fn place(board: &mut Board, name: &str, color: Color, kind: PieceKind, at: &str) -> PieceId {
        board
            .place(Piece::new(name, color, kind, tile(at), &StandardCatalog))
            .unwrap()
    }

    fn names(d: &Destinations) -> Vec<&'static str> {
        d.tiles().map(Tile::name).collect()
    }

    #[test]
    fn test_pawn_single_and_double_step_from_start() {
        let board = Board::from_pieces(standard_layout(&StandardCatalog)).unwrap();
        let pawn = board.find("white_pawn_e").unwrap();
        let d = destinations(&board, pawn, None);
        assert_eq!(names(&d), vec!["3e", "4e"]);
        assert_eq!(d.get(tile("4e")).unwrap().kind, DestinationKind::DoubleStep);
    }

    #[test]
    fn test_pawn_double_step_needs_clear_path() {
        let mut board = Board::new();
        let pawn = place(&mut board, "p", Color::White, PieceKind::Pawn, "2e");
        place(&mut board, "x", Color::Black, PieceKind::Knight, "3e");
        assert!(destinations(&board, pawn, None).is_empty());
    }

    #[test]
    fn test_moved_pawn_has_no_double_step() {
        let mut board = Board::new();
        let pawn = board
            .place(
                Piece::new("p", Color::Black, PieceKind::Pawn, tile("6c"), &StandardCatalog)
                    .with_moved(true),
            )
            .unwrap();
        assert_eq!(names(&destinations(&board, pawn, None)), vec!["5c"]);
    }

    #[test]
    fn test_pawn_captures_only_enemies_diagonally() {
        let mut board = Board::new();
        let pawn = place(&mut board, "p", Color::White, PieceKind::Pawn, "4d");
        place(&mut board, "e", Color::Black, PieceKind::Rook, "5e");
        place(&mut board, "f", Color::White, PieceKind::Rook, "5c");
        place(&mut board, "blocker", Color::Black, PieceKind::Rook, "5d");
        let d = destinations(&board, pawn, None);
        assert_eq!(names(&d), vec!["5e"]);
        assert_eq!(d.get(tile("5e")).unwrap().kind, DestinationKind::Capture);
    }

    #[test]
    fn test_en_passant_tagged_with_victim() {
        let mut board = Board::new();
        let pawn = place(&mut board, "w", Color::White, PieceKind::Pawn, "5e");
        place(&mut board, "b", Color::Black, PieceKind::Pawn, "5d");
        let ep = EnPassant {
            target: tile("6d"),
            victim: tile("5d"),
            capturer: Color::White,
        };
        let d = destinations(&board, pawn, Some(ep));
        assert_eq!(
            d.get(tile("6d")).unwrap().kind,
            DestinationKind::EnPassant { victim: tile("5d") }
        );

        // The window belongs to the other side only.
        let wrong_side = EnPassant {
            capturer: Color::Black,
            ..ep
        };
        assert!(!destinations(&board, pawn, Some(wrong_side)).contains(tile("6d")));
    }

    #[test]
    fn test_rook_ray_stops_at_friend_and_enemy() {
        let mut board = Board::new();
        let rook = place(&mut board, "r", Color::White, PieceKind::Rook, "1a");
        place(&mut board, "friend", Color::White, PieceKind::Knight, "1d");
        place(&mut board, "enemy", Color::Black, PieceKind::Knight, "4a");
        let d = destinations(&board, rook, None);
        assert_eq!(names(&d), vec!["2a", "3a", "4a", "1b", "1c"]);
        assert_eq!(d.get(tile("4a")).unwrap().kind, DestinationKind::Capture);
    }

    #[test]
    fn test_knight_in_corner() {
        let mut board = Board::new();
        let knight = place(&mut board, "n", Color::Black, PieceKind::Knight, "8a");
        let mut got = names(&destinations(&board, knight, None));
        got.sort();
        assert_eq!(got, vec!["6b", "7c"]);
    }

    #[test]
    fn test_king_single_steps() {
        let mut board = Board::new();
        let king = place(&mut board, "k", Color::White, PieceKind::King, "4d");
        assert_eq!(destinations(&board, king, None).len(), 8);
    }

    #[test]
    fn test_opening_position_has_twenty_moves() {
        let board = Board::from_pieces(standard_layout(&StandardCatalog)).unwrap();
        let total: usize = board
            .pieces_of(Color::White)
            .map(|(id, _)| destinations(&board, id, None).len())
            .sum();
        assert_eq!(total, 20);
    }
}
