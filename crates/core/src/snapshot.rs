//! Snapshot types - plain data views of a match
//!
//! A [`MatchSnapshot`] is what the persistence collaborator receives after a
//! committed move or a promotion, and what [`crate::Match::resume`] rebuilds
//! from. The adapter maps it onto its own serializable records.

use crate::movegen::EnPassant;
use crate::types::{Color, PieceKind, Tile};

/// One placed piece
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceRecord {
    pub name: String,
    pub color: Color,
    pub kind: PieceKind,
    pub tile: Tile,
    pub moved: bool,
    pub visual: &'static str,
}

/// Piece-to-tile mapping plus the turn, clocks, and counters needed to resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSnapshot {
    pub pieces: Vec<PieceRecord>,
    pub turn: Color,
    /// Remaining seconds, indexed by [`Color::index`]
    pub clocks: [u32; 2],
    pub since_capture: u16,
    /// Kinds captured *by* each color
    pub captured: [Vec<PieceKind>; 2],
    pub moves: Vec<String>,
    /// Open en passant window, valid for the side to move only
    pub en_passant: Option<EnPassant>,
    /// Pawn on the last row waiting for the side to move to pick a piece
    pub pending_promotion: Option<Tile>,
}

impl MatchSnapshot {
    pub fn clock(&self, color: Color) -> u32 {
        self.clocks[color.index()]
    }

    pub fn captured_by(&self, color: Color) -> &[PieceKind] {
        &self.captured[color.index()]
    }

    /// Tile of a named piece
    pub fn tile_of(&self, name: &str) -> Option<Tile> {
        self.pieces.iter().find(|p| p.name == name).map(|p| p.tile)
    }
}
