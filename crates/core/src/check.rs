//! Check detection
//!
//! From a king's tile, cast along 16 attack vectors: the 8 sliding directions
//! and the 8 knight offsets. A ray stops at its first occupant. If that
//! occupant is an enemy whose template reaches back along the ray (pawns and
//! kings only at distance one), the king is attacked, and the walked tiles plus
//! the attacker become the tiles that resolve the check by block or capture.
//!
//! Trial helpers mutate the board to test a hypothesis and always undo the
//! mutation before returning.

use arrayvec::ArrayVec;

use crate::board::{Board, PieceId};
use crate::movegen::Destination;
use crate::pieces::Piece;
use crate::types::{Color, Tile};

/// The 8 sliding directions (queen lines)
pub const RAY_VECTORS: [(i8, i8); 8] = [
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
];

/// The 8 knight offsets
pub const KNIGHT_VECTORS: [(i8, i8); 8] = [
    (-2, -1),
    (-2, 1),
    (-1, 2),
    (1, 2),
    (2, 1),
    (2, -1),
    (1, -2),
    (-1, -2),
];

/// Result of scanning a king's tile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    attackers: ArrayVec<Tile, 16>,
    resolving: Vec<Tile>,
}

impl CheckReport {
    pub fn is_check(&self) -> bool {
        !self.attackers.is_empty()
    }

    /// Two or more attackers: only a king move can answer
    pub fn is_double(&self) -> bool {
        self.attackers.len() > 1
    }

    pub fn attackers(&self) -> &[Tile] {
        &self.attackers
    }

    /// Tiles a non-king piece may land on to resolve the check.
    ///
    /// Empty under double check.
    pub fn resolving_tiles(&self) -> &[Tile] {
        &self.resolving
    }

    fn record(&mut self, attacker: Tile, walked: &[Tile]) {
        self.attackers.push(attacker);
        if self.attackers.len() == 1 {
            self.resolving.extend_from_slice(walked);
            self.resolving.push(attacker);
        } else {
            self.resolving.clear();
        }
    }
}

/// Does `attacker`, sitting `distance` steps away, hit along `(d_row, d_col)`?
fn hits(attacker: &Piece, d_row: i8, d_col: i8, distance: u8) -> bool {
    if attacker.is_pawn() {
        return distance == 1 && d_row == attacker.color().forward() && d_col.abs() == 1;
    }
    attacker.reaches(d_row, d_col, distance)
}

/// Scan for attacks on a king of `color` standing on `king_tile`
pub fn scan(board: &Board, king_tile: Tile, color: Color) -> CheckReport {
    let mut report = CheckReport::default();

    for (d_row, d_col) in RAY_VECTORS {
        let mut walked: ArrayVec<Tile, 7> = ArrayVec::new();
        let mut cursor = king_tile;
        let mut distance = 0u8;
        while let Some(next) = cursor.offset(d_row, d_col) {
            distance += 1;
            match board.piece_at(next) {
                None => {
                    walked.push(next);
                    cursor = next;
                }
                Some(p) if p.color() == color => break,
                Some(p) => {
                    if hits(p, -d_row, -d_col, distance) {
                        report.record(next, &walked);
                    }
                    break;
                }
            }
        }
    }

    for (d_row, d_col) in KNIGHT_VECTORS {
        let Some(next) = king_tile.offset(d_row, d_col) else {
            continue;
        };
        if let Some(p) = board.piece_at(next) {
            if p.color() != color && !p.is_pawn() && p.reaches(-d_row, -d_col, 1) {
                report.record(next, &[]);
            }
        }
    }

    report
}

/// Scan the current position of `color`'s king
pub fn king_report(board: &Board, color: Color) -> CheckReport {
    board
        .king(color)
        .and_then(|id| board.get(id))
        .map(|k| scan(board, k.tile(), color))
        .unwrap_or_default()
}

/// Apply `dest` for `mover`, evaluate, undo. The board is unchanged afterwards.
fn with_trial<R>(
    board: &mut Board,
    mover: PieceId,
    dest: Destination,
    eval: impl FnOnce(&Board) -> R,
) -> Option<R> {
    let from = board.get(mover)?.tile();
    let captured = dest
        .captured_tile()
        .and_then(|t| board.occupant(t))
        .filter(|id| *id != mover)
        .and_then(|id| board.remove(id).map(|p| (id, p)));

    let moved = board.relocate(mover, dest.tile);
    let result = moved.then(|| eval(board));

    if moved {
        board.relocate(mover, from);
    }
    if let Some((id, piece)) = captured {
        board.restore(id, piece);
    }
    result
}

/// Would playing `dest` with `mover` leave the mover's own king attacked?
///
/// For king moves this hypothesizes the king on the destination.
pub fn leaves_king_safe(board: &mut Board, mover: PieceId, dest: Destination) -> bool {
    let Some(color) = board.get(mover).map(Piece::color) else {
        return false;
    };
    with_trial(board, mover, dest, |b| !king_report(b, color).is_check()).unwrap_or(false)
}

/// Is `tile` safe for `king` to stand on? `tile` must be empty or the king's own.
pub fn tile_safe_for_king(board: &mut Board, king: PieceId, tile: Tile) -> bool {
    leaves_king_safe(
        board,
        king,
        Destination {
            tile,
            kind: crate::movegen::DestinationKind::Quiet,
        },
    )
}
