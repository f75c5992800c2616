//! Draw rules that depend only on material and placement
//!
//! - Insufficient material: no pawns, rooks, or queens, and each side has at
//!   most one minor piece besides its king.
//! - Repetition: positions are keyed by a stable FNV-1a hash of every
//!   occupied tile's (color, kind), the moved flag of kings and rooks
//!   (castling rights), the en passant target, and the side to move.

use std::hash::Hasher;

use crate::board::Board;
use crate::movegen::EnPassant;
use crate::types::{Color, PieceKind, Tile};

/// Stable 64-bit FNV-1a hasher; `DefaultHasher` output is not stable across releases.
#[derive(Debug, Clone)]
struct Fnv1aHasher {
    state: u64,
}

impl Fnv1aHasher {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }
}

impl Hasher for Fnv1aHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.state ^= b as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }
}

/// Neither side can force mate with what is left
pub fn insufficient_material(board: &Board) -> bool {
    let mut minors = [0u8; 2];
    for (_, piece) in board.pieces() {
        match piece.kind() {
            PieceKind::King => {}
            PieceKind::Bishop | PieceKind::Knight => minors[piece.color().index()] += 1,
            PieceKind::Pawn | PieceKind::Rook | PieceKind::Queen => return false,
        }
    }
    minors.iter().all(|&n| n <= 1)
}

/// Key identifying a placement with a side to move and its move rights
pub fn position_key(board: &Board, turn: Color, en_passant: Option<EnPassant>) -> u64 {
    let mut h = Fnv1aHasher::new();
    for piece in Tile::all().filter_map(|t| board.piece_at(t)) {
        h.write_u8(piece.tile().index() as u8);
        h.write_u8(piece.color().index() as u8);
        h.write_u8(piece.kind().letter() as u8);
        if matches!(piece.kind(), PieceKind::King | PieceKind::Rook) {
            h.write_u8(piece.has_moved() as u8);
        }
    }
    h.write_u8(turn.index() as u8);
    h.write_u8(en_passant.map_or(u8::MAX, |ep| ep.target.index() as u8));
    h.finish()
}
