//! Board module - tile-indexed squares plus the piece registry
//!
//! The board is an 8x8 grid stored as a flat array (row-major, `row * 8 + col`).
//! Each square holds an optional [`PieceId`] into the registry and a selection
//! flag. Pieces also record their own tile, so every mutation goes through the
//! methods here, which update both sides together.

use thiserror::Error;

use crate::pieces::{standard_layout, Piece, PieceCatalog};
use crate::types::{Color, PieceKind, Tile, TILE_COUNT};

/// Stable handle to a piece in the registry.
///
/// Ids are never reused within a board, so a captured piece's id stays dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PieceId(u8);

impl PieceId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Mutable state of one tile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Square {
    occupant: Option<PieceId>,
    selected: bool,
}

impl Square {
    pub fn occupant(&self) -> Option<PieceId> {
        self.occupant
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }
}

/// Registry and squares disagree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("square {tile} points at missing piece #{id}")]
    DanglingOccupant { tile: Tile, id: usize },
    #[error("piece {name} claims {claimed} but sits on {actual}")]
    TileMismatch {
        name: String,
        claimed: Tile,
        actual: Tile,
    },
    #[error("piece {name} is not referenced by its square {tile}")]
    Orphaned { name: String, tile: Tile },
    #[error("tile {0} is already occupied")]
    Occupied(Tile),
    #[error("duplicate piece name {0}")]
    DuplicateName(String),
    #[error("registry is full")]
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    squares: [Square; TILE_COUNT],
    pieces: Vec<Option<Piece>>,
}

impl Board {
    /// Create an empty board
    pub fn new() -> Self {
        Self {
            squares: [Square::default(); TILE_COUNT],
            pieces: Vec::with_capacity(32),
        }
    }

    /// Build a board from a list of pieces, rejecting overlaps and duplicate names
    pub fn from_pieces(pieces: impl IntoIterator<Item = Piece>) -> Result<Self, BoardError> {
        let mut board = Self::new();
        for piece in pieces {
            board.place(piece)?;
        }
        Ok(board)
    }

    /// Board with the standard starting layout
    pub fn standard(catalog: &dyn PieceCatalog) -> Self {
        let mut board = Self::new();
        for piece in standard_layout(catalog) {
            // Layout tiles and names are distinct, so placement cannot fail.
            let _ = board.place(piece);
        }
        board
    }

    /// Add a piece to the registry and its square
    pub fn place(&mut self, piece: Piece) -> Result<PieceId, BoardError> {
        let tile = piece.tile();
        if self.squares[tile.index()].occupant.is_some() {
            return Err(BoardError::Occupied(tile));
        }
        if self.find(piece.name()).is_some() {
            return Err(BoardError::DuplicateName(piece.name().to_string()));
        }
        let id = u8::try_from(self.pieces.len()).map_err(|_| BoardError::Full)?;
        let id = PieceId(id);
        self.pieces.push(Some(piece));
        self.squares[tile.index()].occupant = Some(id);
        Ok(id)
    }

    pub fn square(&self, tile: Tile) -> &Square {
        &self.squares[tile.index()]
    }

    pub fn occupant(&self, tile: Tile) -> Option<PieceId> {
        self.squares[tile.index()].occupant
    }

    pub fn is_empty(&self, tile: Tile) -> bool {
        self.occupant(tile).is_none()
    }

    pub fn get(&self, id: PieceId) -> Option<&Piece> {
        self.pieces.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: PieceId) -> Option<&mut Piece> {
        self.pieces.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn piece_at(&self, tile: Tile) -> Option<&Piece> {
        self.occupant(tile).and_then(|id| self.get(id))
    }

    /// Look a piece up by its unique name
    pub fn find(&self, name: &str) -> Option<PieceId> {
        self.pieces().find(|(_, p)| p.name() == name).map(|(id, _)| id)
    }

    pub fn king(&self, color: Color) -> Option<PieceId> {
        self.pieces()
            .find(|(_, p)| p.color() == color && p.kind() == PieceKind::King)
            .map(|(id, _)| id)
    }

    /// Pieces still on the board, in registry order
    pub fn pieces(&self) -> impl Iterator<Item = (PieceId, &Piece)> + '_ {
        self.pieces
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|p| (PieceId(i as u8), p)))
    }

    pub fn pieces_of(&self, color: Color) -> impl Iterator<Item = (PieceId, &Piece)> + '_ {
        self.pieces().filter(move |(_, p)| p.color() == color)
    }

    /// Ids of `color`'s pieces; collected so callers may mutate the board
    pub fn ids_of(&self, color: Color) -> Vec<PieceId> {
        self.pieces_of(color).map(|(id, _)| id).collect()
    }

    pub fn piece_count(&self) -> usize {
        self.pieces().count()
    }

    pub fn set_selected(&mut self, tile: Tile, selected: bool) {
        self.squares[tile.index()].selected = selected;
    }

    /// Clear every selection flag
    pub fn clear_selection(&mut self) {
        for square in self.squares.iter_mut() {
            square.selected = false;
        }
    }

    /// Move a piece onto an empty tile, updating square and registry together.
    /// Returns false (and changes nothing) if the id is dead or `to` is occupied.
    pub(crate) fn relocate(&mut self, id: PieceId, to: Tile) -> bool {
        let Some(from) = self.get(id).map(Piece::tile) else {
            return false;
        };
        if from == to {
            return true;
        }
        if self.squares[to.index()].occupant.is_some() {
            return false;
        }
        self.squares[from.index()].occupant = None;
        self.squares[to.index()].occupant = Some(id);
        if let Some(piece) = self.get_mut(id) {
            piece.set_tile(to);
        }
        true
    }

    /// Take a piece off the board and out of the registry
    pub(crate) fn remove(&mut self, id: PieceId) -> Option<Piece> {
        let piece = self.pieces.get_mut(id.index())?.take()?;
        let square = &mut self.squares[piece.tile().index()];
        if square.occupant == Some(id) {
            square.occupant = None;
        }
        Some(piece)
    }

    /// Put a removed piece back under its old id (trial-move undo)
    pub(crate) fn restore(&mut self, id: PieceId, piece: Piece) {
        let tile = piece.tile();
        if let Some(slot) = self.pieces.get_mut(id.index()) {
            *slot = Some(piece);
            self.squares[tile.index()].occupant = Some(id);
        }
    }

    /// Verify that squares and registry agree
    pub fn verify(&self) -> Result<(), BoardError> {
        for tile in Tile::all() {
            let Some(id) = self.occupant(tile) else {
                continue;
            };
            let piece = self.get(id).ok_or(BoardError::DanglingOccupant {
                tile,
                id: id.index(),
            })?;
            if piece.tile() != tile {
                return Err(BoardError::TileMismatch {
                    name: piece.name().to_string(),
                    claimed: piece.tile(),
                    actual: tile,
                });
            }
        }
        for (id, piece) in self.pieces() {
            if self.occupant(piece.tile()) != Some(id) {
                return Err(BoardError::Orphaned {
                    name: piece.name().to_string(),
                    tile: piece.tile(),
                });
            }
        }
        Ok(())
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pieces::{standard_layout, StandardCatalog};

    fn tile(name: &str) -> Tile {
        Tile::from_name(name).unwrap()
    }

    fn rook(name: &str, at: &str) -> Piece {
        Piece::new(name, Color::White, PieceKind::Rook, tile(at), &StandardCatalog)
    }

    #[test]
    fn test_board_new_is_empty() {
        let board = Board::new();
        assert_eq!(board.piece_count(), 0);
        assert!(Tile::all().all(|t| board.is_empty(t)));
    }

    #[test]
    fn test_standard_board_is_consistent() {
        let board = Board::standard(&StandardCatalog);
        assert_eq!(board.piece_count(), 32);
        assert_eq!(board, Board::from_pieces(standard_layout(&StandardCatalog)).unwrap());
        assert!(board.verify().is_ok());
        assert_eq!(board.piece_at(tile("1e")).unwrap().name(), "white_king");
    }

    #[test]
    fn test_place_rejects_overlap_and_duplicates() {
        let mut board = Board::new();
        board.place(rook("a", "1a")).unwrap();
        assert_eq!(board.place(rook("b", "1a")), Err(BoardError::Occupied(tile("1a"))));
        assert_eq!(
            board.place(rook("a", "1b")),
            Err(BoardError::DuplicateName("a".to_string()))
        );
    }

    #[test]
    fn test_relocate_updates_both_sides() {
        let mut board = Board::new();
        let id = board.place(rook("r", "1a")).unwrap();
        assert!(board.relocate(id, tile("5a")));
        assert!(board.is_empty(tile("1a")));
        assert_eq!(board.occupant(tile("5a")), Some(id));
        assert_eq!(board.get(id).unwrap().tile(), tile("5a"));
        assert!(board.verify().is_ok());
    }

    #[test]
    fn test_relocate_refuses_occupied_target() {
        let mut board = Board::new();
        let a = board.place(rook("a", "1a")).unwrap();
        board.place(rook("b", "1b")).unwrap();
        assert!(!board.relocate(a, tile("1b")));
        assert_eq!(board.get(a).unwrap().tile(), tile("1a"));
    }

    #[test]
    fn test_remove_and_restore_round_trip() {
        let mut board = Board::new();
        let id = board.place(rook("r", "3c")).unwrap();
        let before = board.clone();
        let piece = board.remove(id).unwrap();
        assert!(board.get(id).is_none());
        assert!(board.is_empty(tile("3c")));
        board.restore(id, piece);
        assert_eq!(board, before);
    }

    #[test]
    fn test_verify_detects_desync() {
        let mut board = Board::new();
        let id = board.place(rook("r", "3c")).unwrap();
        board.get_mut(id).unwrap().set_tile(tile("4c"));
        assert!(matches!(board.verify(), Err(BoardError::TileMismatch { .. })));
    }
}
