//! Match - the turn state machine
//!
//! A [`Match`] owns the board, the piece registry, clocks, counters, and the
//! selection state. Every entry point returns a definite [`Outcome`]; rejected
//! actions leave the match untouched.
//!
//! Persistent phases are [`TurnPhase::Idle`], [`TurnPhase::Selected`],
//! [`TurnPhase::AwaitingPromotion`], and [`TurnPhase::Over`]. A destination
//! runs through validate, commit, post-move check, optional promotion, and
//! turn completion inside a single call.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::board::{Board, BoardError, PieceId};
use crate::check;
use crate::delta::{Audience, DeliverySink, Delta};
use crate::movegen::{self, Destination, DestinationKind, Destinations, EnPassant};
use crate::pieces::{Piece, PieceCatalog, StandardCatalog};
use crate::rules;
use crate::snapshot::{MatchSnapshot, PieceRecord};
use crate::types::{Color, EndReason, GameOver, MatchConfig, PieceKind, Tile};

/// Who is acting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actor {
    /// Hot-seat caller; always acts for the side to move
    Local,
    /// An authenticated player bound to one color
    Seat(Color),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Click a tile holding a piece: select, deselect, swap, castle, or capture
    Select(Tile),
    /// Send the selected piece to a tile
    MoveTo(Tile),
    Promote(PieceKind),
    Resign,
}

/// Why an action had no effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    MatchOver,
    NotYourTurn,
    EmptyTile,
    NotYourPiece,
    NothingSelected,
    IllegalDestination,
    MustResolveCheck,
    LeavesKingInCheck,
    PromotionPending,
    NoPromotionPending,
    InvalidPromotion,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::MatchOver => "match_over",
            Rejection::NotYourTurn => "not_your_turn",
            Rejection::EmptyTile => "empty_tile",
            Rejection::NotYourPiece => "not_your_piece",
            Rejection::NothingSelected => "nothing_selected",
            Rejection::IllegalDestination => "illegal_destination",
            Rejection::MustResolveCheck => "must_resolve_check",
            Rejection::LeavesKingInCheck => "leaves_king_in_check",
            Rejection::PromotionPending => "promotion_pending",
            Rejection::NoPromotionPending => "no_promotion_pending",
            Rejection::InvalidPromotion => "invalid_promotion",
        }
    }
}

/// Side effects of an accepted action that callers act on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Effects {
    /// A move (or castle) was committed to the board
    pub committed: bool,
    /// A pending promotion was resolved
    pub promoted: bool,
    pub finished: Option<GameOver>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted(Effects),
    Rejected(Rejection),
}

impl Outcome {
    fn accepted() -> Self {
        Outcome::Accepted(Effects::default())
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted(_))
    }

    pub fn effects(&self) -> Option<Effects> {
        match self {
            Outcome::Accepted(e) => Some(*e),
            Outcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Outcome::Accepted(_) => None,
            Outcome::Rejected(r) => Some(*r),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Selected {
        piece: PieceId,
        destinations: Destinations,
    },
    /// A pawn reached the last row; the turn is suspended until it is promoted
    AwaitingPromotion {
        pawn: PieceId,
    },
    Over(GameOver),
}

/// One ply in tile notation: `"2e-4e"`, `"1e-1g"`, `"7a-8a=q"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MoveRecord {
    pub from: Tile,
    pub to: Tile,
    pub promotion: Option<PieceKind>,
}

impl MoveRecord {
    pub fn parse(s: &str) -> Option<Self> {
        let (squares, promotion) = match s.split_once('=') {
            Some((sq, p)) => (sq, Some(PieceKind::from_str(p)?)),
            None => (s, None),
        };
        let (from, to) = squares.split_once('-')?;
        Some(Self {
            from: Tile::from_name(from)?,
            to: Tile::from_name(to)?,
            promotion,
        })
    }
}

impl fmt::Display for MoveRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)?;
        if let Some(kind) = self.promotion {
            write!(f, "={}", kind.letter())?;
        }
        Ok(())
    }
}

/// A snapshot could not be turned back into a match
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error("{0} king is missing")]
    MissingKing(Color),
    #[error("unreadable move record {0:?}")]
    BadMove(String),
    #[error("no pawn to capture en passant behind {0}")]
    BadEnPassant(Tile),
    #[error("no pawn awaiting promotion on {0}")]
    BadPromotion(Tile),
}

#[derive(Debug, Clone)]
pub struct Match {
    board: Board,
    catalog: Arc<dyn PieceCatalog>,
    config: MatchConfig,
    phase: TurnPhase,
    turn: Color,
    in_check: [bool; 2],
    /// Tiles that block or capture the current check
    resolving: Vec<Tile>,
    clocks: [u32; 2],
    since_capture: u16,
    en_passant: Option<EnPassant>,
    history: Vec<MoveRecord>,
    captured: [Vec<PieceKind>; 2],
    /// Position keys since the last irreversible move
    positions: Vec<u64>,
}

impl Match {
    /// Fresh game with the standard catalog
    pub fn new(config: MatchConfig) -> Self {
        Self::with_catalog(config, Arc::new(StandardCatalog))
    }

    pub fn with_catalog(config: MatchConfig, catalog: Arc<dyn PieceCatalog>) -> Self {
        let board = Board::standard(catalog.as_ref());
        Self::build(board, Color::White, config, catalog)
    }

    /// Start from an arbitrary position built with the standard catalog
    pub fn from_position(board: Board, turn: Color, config: MatchConfig) -> Self {
        Self::build(board, turn, config, Arc::new(StandardCatalog))
    }

    fn build(board: Board, turn: Color, config: MatchConfig, catalog: Arc<dyn PieceCatalog>) -> Self {
        let mut game = Self {
            board,
            catalog,
            config,
            phase: TurnPhase::Idle,
            turn,
            in_check: [false; 2],
            resolving: Vec::new(),
            clocks: [config.clock_secs; 2],
            since_capture: 0,
            en_passant: None,
            history: Vec::new(),
            captured: [Vec::new(), Vec::new()],
            positions: Vec::new(),
        };
        game.refresh_check_state();
        game.record_position();
        game
    }

    /// Rebuild a match from a persisted snapshot
    pub fn resume(snapshot: &MatchSnapshot, config: MatchConfig) -> Result<Self, SnapshotError> {
        let catalog: Arc<dyn PieceCatalog> = Arc::new(StandardCatalog);
        let board = Board::from_pieces(snapshot.pieces.iter().map(|r| {
            Piece::new(r.name.clone(), r.color, r.kind, r.tile, catalog.as_ref()).with_moved(r.moved)
        }))?;
        for color in Color::ALL {
            if board.king(color).is_none() {
                return Err(SnapshotError::MissingKing(color));
            }
        }
        let history = snapshot
            .moves
            .iter()
            .map(|m| MoveRecord::parse(m).ok_or_else(|| SnapshotError::BadMove(m.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        let mut game = Self::build(board, snapshot.turn, config, catalog);
        game.clocks = snapshot.clocks;
        game.since_capture = snapshot.since_capture;
        game.captured = snapshot.captured.clone();
        game.history = history;

        if let Some(ep) = snapshot.en_passant {
            let victim_ok = game.board.piece_at(ep.victim).is_some_and(|p| {
                p.is_pawn() && p.color() == ep.capturer.opposite()
            });
            if ep.capturer != snapshot.turn || !victim_ok || !game.board.is_empty(ep.target) {
                return Err(SnapshotError::BadEnPassant(ep.target));
            }
            game.en_passant = Some(ep);
            game.positions.clear();
            game.record_position();
        }
        if let Some(tile) = snapshot.pending_promotion {
            let promotable = |p: &Piece| {
                p.is_pawn() && p.color() == snapshot.turn && tile.row() == p.color().promotion_row()
            };
            let pawn = game
                .board
                .occupant(tile)
                .filter(|&id| game.board.get(id).is_some_and(promotable));
            let Some(pawn) = pawn else {
                return Err(SnapshotError::BadPromotion(tile));
            };
            game.phase = TurnPhase::AwaitingPromotion { pawn };
        }
        Ok(game)
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn phase(&self) -> &TurnPhase {
        &self.phase
    }

    pub fn turn(&self) -> Color {
        self.turn
    }

    pub fn is_in_check(&self, color: Color) -> bool {
        self.in_check[color.index()]
    }

    /// Tiles that resolve the current check; empty when no one is in check
    pub fn resolving_tiles(&self) -> &[Tile] {
        &self.resolving
    }

    pub fn clock(&self, color: Color) -> u32 {
        self.clocks[color.index()]
    }

    pub fn since_capture(&self) -> u16 {
        self.since_capture
    }

    pub fn en_passant(&self) -> Option<EnPassant> {
        self.en_passant
    }

    pub fn history(&self) -> &[MoveRecord] {
        &self.history
    }

    pub fn captured_by(&self, color: Color) -> &[PieceKind] {
        &self.captured[color.index()]
    }

    pub fn selected(&self) -> Option<PieceId> {
        match &self.phase {
            TurnPhase::Selected { piece, .. } => Some(*piece),
            _ => None,
        }
    }

    pub fn game_over(&self) -> Option<GameOver> {
        match self.phase {
            TurnPhase::Over(over) => Some(over),
            _ => None,
        }
    }

    pub fn is_over(&self) -> bool {
        self.game_over().is_some()
    }

    /// Piece-to-tile mapping plus counters, in tile order
    pub fn snapshot(&self) -> MatchSnapshot {
        let pieces = Tile::all()
            .filter_map(|t| self.board.piece_at(t))
            .map(|p| PieceRecord {
                name: p.name().to_string(),
                color: p.color(),
                kind: p.kind(),
                tile: p.tile(),
                moved: p.has_moved(),
                visual: p.visual(),
            })
            .collect();
        MatchSnapshot {
            pieces,
            turn: self.turn,
            clocks: self.clocks,
            since_capture: self.since_capture,
            captured: self.captured.clone(),
            moves: self.history.iter().map(ToString::to_string).collect(),
            en_passant: self.en_passant,
            pending_promotion: match self.phase {
                TurnPhase::AwaitingPromotion { pawn } => self.board.get(pawn).map(|p| p.tile()),
                _ => None,
            },
        }
    }

    /// Send the full position to `audience`
    pub fn resync(&self, audience: Audience, sink: &mut dyn DeliverySink) {
        sink.emit(audience, Delta::Position(self.snapshot()));
        sink.emit(audience, self.clock_delta());
        for color in Color::ALL {
            if let Some(king) = self.in_check[color.index()].then(|| self.king_tile(color)).flatten() {
                sink.emit(
                    audience,
                    Delta::Check {
                        color,
                        king,
                        attackers: check::king_report(&self.board, color).attackers().to_vec(),
                        resolving: self.resolving.clone(),
                    },
                );
            }
        }
        if let Some(over) = self.game_over() {
            sink.emit(audience, Delta::GameOver(over));
        }
    }

    /// Legal destinations for the piece on `tile`, king safety included
    pub fn legal_moves(&mut self, tile: Tile) -> Destinations {
        match self.board.occupant(tile) {
            Some(id) => self.legal_destinations(id),
            None => Destinations::new(),
        }
    }

    /// Apply one player action
    pub fn apply(&mut self, actor: Actor, action: Action, sink: &mut dyn DeliverySink) -> Outcome {
        if self.is_over() {
            return Outcome::Rejected(Rejection::MatchOver);
        }
        if let Action::Resign = action {
            let loser = match actor {
                Actor::Local => self.turn,
                Actor::Seat(color) => color,
            };
            let over = GameOver::loss(loser, EndReason::Resignation);
            self.finish(over, sink);
            return Outcome::Accepted(Effects {
                finished: Some(over),
                ..Effects::default()
            });
        }
        if let Actor::Seat(color) = actor {
            if color != self.turn {
                return Outcome::Rejected(Rejection::NotYourTurn);
            }
        }
        match action {
            Action::Select(tile) => self.select(tile, sink),
            Action::MoveTo(tile) => self.move_to(tile, sink),
            Action::Promote(kind) => self.promote(kind, sink),
            Action::Resign => Outcome::Rejected(Rejection::MatchOver),
        }
    }

    /// Charge `elapsed_secs` to the side to move. Flags a time forfeit at zero.
    pub fn tick(&mut self, elapsed_secs: u32, sink: &mut dyn DeliverySink) -> Option<GameOver> {
        if self.is_over() {
            return None;
        }
        let side = self.turn.index();
        self.clocks[side] = self.clocks[side].saturating_sub(elapsed_secs);
        sink.emit(Audience::Everyone, self.clock_delta());
        if self.clocks[side] == 0 {
            let over = GameOver::loss(self.turn, EndReason::TimeForfeit);
            self.finish(over, sink);
            return Some(over);
        }
        None
    }

    /// End the match against `loser` (disconnect, explicit end)
    pub fn forfeit(
        &mut self,
        loser: Color,
        reason: EndReason,
        sink: &mut dyn DeliverySink,
    ) -> Option<GameOver> {
        if self.is_over() {
            return None;
        }
        let over = GameOver::loss(loser, reason);
        self.finish(over, sink);
        Some(over)
    }

    fn select(&mut self, tile: Tile, sink: &mut dyn DeliverySink) -> Outcome {
        if matches!(self.phase, TurnPhase::AwaitingPromotion { .. }) {
            return Outcome::Rejected(Rejection::PromotionPending);
        }
        let Some((id, color)) = self
            .board
            .occupant(tile)
            .and_then(|id| self.board.get(id).map(|p| (id, p.color())))
        else {
            return Outcome::Rejected(Rejection::EmptyTile);
        };

        if color != self.turn {
            // Clicking an enemy with a piece selected is a capture attempt.
            return match self.selected() {
                Some(_) => self.move_to(tile, sink),
                None => Outcome::Rejected(Rejection::NotYourPiece),
            };
        }

        if let Some(current) = self.selected() {
            if current == id {
                self.deselect(sink);
                return Outcome::accepted();
            }
            if let Some(outcome) = self.try_castle(current, id, sink) {
                return outcome;
            }
            self.deselect(sink);
        }

        let destinations = self.legal_destinations(id);
        let name = self.piece_name(id);
        self.board.set_selected(tile, true);
        sink.emit(
            Audience::Actor,
            Delta::Selected {
                piece: name,
                tile,
                destinations: destinations.tiles().collect(),
            },
        );
        self.phase = TurnPhase::Selected {
            piece: id,
            destinations,
        };
        Outcome::accepted()
    }

    fn deselect(&mut self, sink: &mut dyn DeliverySink) {
        let Some(id) = self.selected() else {
            return;
        };
        self.phase = TurnPhase::Idle;
        if let Some(piece) = self.board.get(id) {
            let (tile, name) = (piece.tile(), piece.name().to_string());
            self.board.set_selected(tile, false);
            sink.emit(Audience::Actor, Delta::Deselected { piece: name, tile });
        }
    }

    fn move_to(&mut self, tile: Tile, sink: &mut dyn DeliverySink) -> Outcome {
        let id = match &self.phase {
            TurnPhase::Selected { piece, .. } => *piece,
            TurnPhase::AwaitingPromotion { .. } => {
                return Outcome::Rejected(Rejection::PromotionPending)
            }
            _ => return Outcome::Rejected(Rejection::NothingSelected),
        };
        let Some(dest) = movegen::destinations(&self.board, id, self.en_passant).get(tile) else {
            return Outcome::Rejected(Rejection::IllegalDestination);
        };
        if !self.resolves_check(id, dest) {
            return Outcome::Rejected(Rejection::MustResolveCheck);
        }
        if !check::leaves_king_safe(&mut self.board, id, dest) {
            return Outcome::Rejected(Rejection::LeavesKingInCheck);
        }
        self.commit(id, dest, sink)
    }

    fn commit(&mut self, id: PieceId, dest: Destination, sink: &mut dyn DeliverySink) -> Outcome {
        let Some((from, name, is_pawn)) = self
            .board
            .get(id)
            .map(|p| (p.tile(), p.name().to_string(), p.is_pawn()))
        else {
            return Outcome::Rejected(Rejection::NothingSelected);
        };
        self.board.set_selected(from, false);
        self.phase = TurnPhase::Idle;
        self.en_passant = None;

        let victim = dest
            .captured_tile()
            .and_then(|t| self.board.occupant(t))
            .and_then(|v| self.board.remove(v));
        let captured = victim.is_some();
        if let Some(piece) = victim {
            self.captured[self.turn.index()].push(piece.kind());
            sink.emit(
                Audience::Everyone,
                Delta::Removed {
                    piece: piece.name().to_string(),
                    tile: piece.tile(),
                },
            );
            sink.emit(
                Audience::Everyone,
                Delta::Captured {
                    by: self.turn,
                    kind: piece.kind(),
                    visual: piece.visual(),
                },
            );
        }

        let relocated = self.board.relocate(id, dest.tile);
        debug_assert!(relocated, "validated destination {} was occupied", dest.tile);
        if let Some(piece) = self.board.get_mut(id) {
            piece.set_moved(true);
        }
        if dest.kind == DestinationKind::DoubleStep {
            self.en_passant = from.offset(self.turn.forward(), 0).map(|target| EnPassant {
                target,
                victim: dest.tile,
                capturer: self.turn.opposite(),
            });
        }
        self.since_capture = if captured {
            0
        } else {
            self.since_capture.saturating_add(1)
        };
        if captured || is_pawn {
            self.positions.clear();
        }
        self.history.push(MoveRecord {
            from,
            to: dest.tile,
            promotion: None,
        });
        sink.emit(
            Audience::Everyone,
            Delta::Moved {
                piece: name.clone(),
                from,
                to: dest.tile,
            },
        );
        debug_assert!(self.board.verify().is_ok());

        self.clear_own_check(sink);
        self.post_move_check(sink);

        if is_pawn && dest.tile.row() == self.turn.promotion_row() {
            self.phase = TurnPhase::AwaitingPromotion { pawn: id };
            sink.emit(
                Audience::Actor,
                Delta::PromotionPending {
                    piece: name,
                    tile: dest.tile,
                    color: self.turn,
                },
            );
            return Outcome::Accepted(Effects {
                committed: true,
                ..Effects::default()
            });
        }

        let finished = self.complete_turn(sink);
        Outcome::Accepted(Effects {
            committed: true,
            promoted: false,
            finished,
        })
    }

    /// King and unmoved rook selected together: castle if the path is clear and safe.
    /// Returns None when the pair cannot castle, so the caller falls back to a swap.
    fn try_castle(
        &mut self,
        first: PieceId,
        second: PieceId,
        sink: &mut dyn DeliverySink,
    ) -> Option<Outcome> {
        let kinds = (
            self.board.get(first)?.kind(),
            self.board.get(second)?.kind(),
        );
        let (king, rook) = match kinds {
            (PieceKind::King, PieceKind::Rook) => (first, second),
            (PieceKind::Rook, PieceKind::King) => (second, first),
            _ => return None,
        };
        let (k, r) = (self.board.get(king)?, self.board.get(rook)?);
        if k.has_moved() || r.has_moved() || self.in_check[self.turn.index()] {
            return None;
        }
        let (king_from, rook_from) = (k.tile(), r.tile());
        if king_from.row() != rook_from.row() || king_from.col().abs_diff(rook_from.col()) < 3 {
            return None;
        }
        let row = king_from.row();
        let dir: i8 = if rook_from.col() > king_from.col() { 1 } else { -1 };

        let (lo, hi) = (
            king_from.col().min(rook_from.col()) + 1,
            king_from.col().max(rook_from.col()),
        );
        if (lo..hi).any(|col| Tile::new(row, col).map_or(true, |t| !self.board.is_empty(t))) {
            return None;
        }
        let rook_to = king_from.offset(0, dir)?;
        let king_to = king_from.offset(0, 2 * dir)?;
        for transit in [rook_to, king_to] {
            if !check::tile_safe_for_king(&mut self.board, king, transit) {
                return None;
            }
        }

        self.deselect(sink);
        self.en_passant = None;
        let (king_name, rook_name) = (self.piece_name(king), self.piece_name(rook));
        let moved = self.board.relocate(king, king_to) && self.board.relocate(rook, rook_to);
        debug_assert!(moved, "castle path was verified empty");
        for id in [king, rook] {
            if let Some(piece) = self.board.get_mut(id) {
                piece.set_moved(true);
            }
        }
        self.since_capture = self.since_capture.saturating_add(1);
        self.positions.clear();
        self.history.push(MoveRecord {
            from: king_from,
            to: king_to,
            promotion: None,
        });
        sink.emit(
            Audience::Everyone,
            Delta::Moved {
                piece: king_name,
                from: king_from,
                to: king_to,
            },
        );
        sink.emit(
            Audience::Everyone,
            Delta::Moved {
                piece: rook_name,
                from: rook_from,
                to: rook_to,
            },
        );
        debug_assert!(self.board.verify().is_ok());

        self.post_move_check(sink);
        let finished = self.complete_turn(sink);
        Some(Outcome::Accepted(Effects {
            committed: true,
            promoted: false,
            finished,
        }))
    }

    fn promote(&mut self, kind: PieceKind, sink: &mut dyn DeliverySink) -> Outcome {
        let TurnPhase::AwaitingPromotion { pawn } = self.phase else {
            return Outcome::Rejected(Rejection::NoPromotionPending);
        };
        if !PieceKind::PROMOTIONS.contains(&kind) {
            return Outcome::Rejected(Rejection::InvalidPromotion);
        }
        let catalog = Arc::clone(&self.catalog);
        let Some(piece) = self.board.get_mut(pawn) else {
            return Outcome::Rejected(Rejection::NoPromotionPending);
        };
        piece.promote(kind, catalog.as_ref());
        let (name, tile, visual) = (piece.name().to_string(), piece.tile(), piece.visual());

        if let Some(last) = self.history.last_mut() {
            last.promotion = Some(kind);
        }
        self.phase = TurnPhase::Idle;
        sink.emit(
            Audience::Everyone,
            Delta::Promoted {
                piece: name,
                tile,
                kind,
                visual,
            },
        );

        self.post_move_check(sink);
        let finished = self.complete_turn(sink);
        Outcome::Accepted(Effects {
            committed: false,
            promoted: true,
            finished,
        })
    }

    fn legal_destinations(&mut self, id: PieceId) -> Destinations {
        let pseudo = movegen::destinations(&self.board, id, self.en_passant);
        let mut legal = Destinations::new();
        for dest in pseudo.iter().copied() {
            if self.resolves_check(id, dest) && check::leaves_king_safe(&mut self.board, id, dest) {
                legal.push(dest);
            }
        }
        legal
    }

    /// While in check only king moves or moves onto a resolving tile count
    fn resolves_check(&self, id: PieceId, dest: Destination) -> bool {
        let Some(piece) = self.board.get(id) else {
            return false;
        };
        if !self.in_check[piece.color().index()] || piece.is_king() {
            return true;
        }
        self.resolving.contains(&dest.tile)
            || dest
                .captured_tile()
                .is_some_and(|t| self.resolving.contains(&t))
    }

    fn has_legal_move(&mut self, color: Color) -> bool {
        for id in self.board.ids_of(color) {
            if !self.legal_destinations(id).is_empty() {
                return true;
            }
        }
        false
    }

    fn clear_own_check(&mut self, sink: &mut dyn DeliverySink) {
        let mover = self.turn;
        if !self.in_check[mover.index()] {
            return;
        }
        self.in_check[mover.index()] = false;
        self.resolving.clear();
        if let Some(king) = self.king_tile(mover) {
            sink.emit(Audience::Everyone, Delta::CheckCleared { color: mover, king });
        }
    }

    /// Run check detection against the mover's opponent
    fn post_move_check(&mut self, sink: &mut dyn DeliverySink) {
        let opponent = self.turn.opposite();
        let report = check::king_report(&self.board, opponent);
        let Some(king) = self.king_tile(opponent) else {
            return;
        };
        if report.is_check() {
            self.in_check[opponent.index()] = true;
            self.resolving = report.resolving_tiles().to_vec();
            sink.emit(
                Audience::Everyone,
                Delta::Check {
                    color: opponent,
                    king,
                    attackers: report.attackers().to_vec(),
                    resolving: self.resolving.clone(),
                },
            );
        } else if self.in_check[opponent.index()] {
            self.in_check[opponent.index()] = false;
            self.resolving.clear();
            sink.emit(Audience::Everyone, Delta::CheckCleared { color: opponent, king });
        }
    }

    /// Clocks, handoff, and terminal evaluation for the side now to move
    fn complete_turn(&mut self, sink: &mut dyn DeliverySink) -> Option<GameOver> {
        let mover = self.turn;
        let side = mover.index();
        self.clocks[side] = self.clocks[side].saturating_add(self.config.increment_secs);
        self.turn = mover.opposite();
        sink.emit(Audience::Everyone, self.clock_delta());
        self.record_position();

        let verdict = self.terminal_state();
        if let Some(over) = verdict {
            self.finish(over, sink);
        }
        verdict
    }

    fn terminal_state(&mut self) -> Option<GameOver> {
        if self.since_capture >= self.config.fifty_move_limit {
            return Some(GameOver::draw(EndReason::FiftyMoves));
        }
        if rules::insufficient_material(&self.board) {
            return Some(GameOver::draw(EndReason::InsufficientMaterial));
        }
        if let Some(&latest) = self.positions.last() {
            let seen = self.positions.iter().filter(|&&k| k == latest).count();
            if seen >= self.config.repetition_limit as usize {
                return Some(GameOver::draw(EndReason::Repetition));
            }
        }
        if !self.has_legal_move(self.turn) {
            return Some(if self.in_check[self.turn.index()] {
                GameOver::loss(self.turn, EndReason::Checkmate)
            } else {
                GameOver::draw(EndReason::Stalemate)
            });
        }
        None
    }

    fn finish(&mut self, over: GameOver, sink: &mut dyn DeliverySink) {
        self.board.clear_selection();
        self.phase = TurnPhase::Over(over);
        sink.emit(Audience::Everyone, Delta::GameOver(over));
    }

    fn record_position(&mut self) {
        let key = rules::position_key(&self.board, self.turn, self.en_passant);
        self.positions.push(key);
    }

    fn refresh_check_state(&mut self) {
        self.in_check = [false; 2];
        self.resolving.clear();
        for color in Color::ALL {
            let report = check::king_report(&self.board, color);
            if report.is_check() {
                self.in_check[color.index()] = true;
                self.resolving = report.resolving_tiles().to_vec();
            }
        }
    }

    fn clock_delta(&self) -> Delta {
        Delta::Clock {
            white_secs: self.clocks[Color::White.index()],
            black_secs: self.clocks[Color::Black.index()],
            active: self.turn,
        }
    }

    fn king_tile(&self, color: Color) -> Option<Tile> {
        self.board
            .king(color)
            .and_then(|id| self.board.get(id))
            .map(Piece::tile)
    }

    fn piece_name(&self, id: PieceId) -> String {
        self.board
            .get(id)
            .map(|p| p.name().to_string())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Recorded = Vec<(Audience, Delta)>;

    fn tile(name: &str) -> Tile {
        Tile::from_name(name).unwrap()
    }

    fn play(game: &mut Match, from: &str, to: &str) -> Outcome {
        let mut out: Recorded = Vec::new();
        let selected = game.apply(Actor::Local, Action::Select(tile(from)), &mut out);
        assert!(selected.is_accepted(), "select {from} rejected: {selected:?}");
        game.apply(Actor::Local, Action::MoveTo(tile(to)), &mut out)
    }

    #[test]
    fn test_new_match_starts_idle_with_white() {
        let game = Match::new(MatchConfig::default());
        assert_eq!(game.turn(), Color::White);
        assert_eq!(game.phase(), &TurnPhase::Idle);
        assert_eq!(game.clock(Color::Black), 600);
        assert_eq!(game.board().piece_count(), 32);
    }

    #[test]
    fn test_select_toggle_and_swap() {
        let mut game = Match::new(MatchConfig::default());
        let mut out: Recorded = Vec::new();

        assert!(game.apply(Actor::Local, Action::Select(tile("2e")), &mut out).is_accepted());
        assert!(game.board().square(tile("2e")).is_selected());

        // Same tile again deselects.
        assert!(game.apply(Actor::Local, Action::Select(tile("2e")), &mut out).is_accepted());
        assert_eq!(game.phase(), &TurnPhase::Idle);
        assert!(!game.board().square(tile("2e")).is_selected());

        // Swapping keeps the turn.
        game.apply(Actor::Local, Action::Select(tile("2e")), &mut out);
        game.apply(Actor::Local, Action::Select(tile("1g")), &mut out);
        assert_eq!(game.selected(), game.board().find("white_knight_g"));
        assert!(!game.board().square(tile("2e")).is_selected());
        assert_eq!(game.turn(), Color::White);
    }

    #[test]
    fn test_selection_deltas_go_to_actor_only() {
        let mut game = Match::new(MatchConfig::default());
        let mut out: Recorded = Vec::new();
        game.apply(Actor::Local, Action::Select(tile("1b")), &mut out);
        assert_eq!(out.len(), 1);
        let (audience, delta) = &out[0];
        assert_eq!(*audience, Audience::Actor);
        match delta {
            Delta::Selected { destinations, .. } => {
                assert_eq!(destinations.len(), 2);
                assert!(destinations.contains(&tile("3a")));
                assert!(destinations.contains(&tile("3c")));
            }
            other => panic!("unexpected delta {other:?}"),
        }
    }

    #[test]
    fn test_rejections_do_not_mutate() {
        let mut game = Match::new(MatchConfig::default());
        let mut out: Recorded = Vec::new();
        let before = game.snapshot();

        assert_eq!(
            game.apply(Actor::Local, Action::Select(tile("4e")), &mut out),
            Outcome::Rejected(Rejection::EmptyTile)
        );
        assert_eq!(
            game.apply(Actor::Local, Action::Select(tile("7e")), &mut out),
            Outcome::Rejected(Rejection::NotYourPiece)
        );
        assert_eq!(
            game.apply(Actor::Local, Action::MoveTo(tile("4e")), &mut out),
            Outcome::Rejected(Rejection::NothingSelected)
        );
        assert_eq!(
            game.apply(Actor::Seat(Color::Black), Action::Select(tile("7e")), &mut out),
            Outcome::Rejected(Rejection::NotYourTurn)
        );
        game.apply(Actor::Local, Action::Select(tile("2e")), &mut out);
        assert_eq!(
            game.apply(Actor::Local, Action::MoveTo(tile("5e")), &mut out),
            Outcome::Rejected(Rejection::IllegalDestination)
        );
        assert_eq!(game.snapshot(), before);
    }

    #[test]
    fn test_move_commits_and_hands_off() {
        let mut game = Match::new(MatchConfig::default());
        let outcome = play(&mut game, "2e", "4e");
        assert_eq!(
            outcome.effects(),
            Some(Effects {
                committed: true,
                promoted: false,
                finished: None
            })
        );
        assert_eq!(game.turn(), Color::Black);
        assert_eq!(game.board().piece_at(tile("4e")).unwrap().name(), "white_pawn_e");
        assert_eq!(game.history()[0].to_string(), "2e-4e");
        assert_eq!(game.since_capture(), 1);
    }

    #[test]
    fn test_increment_added_to_mover() {
        let config = MatchConfig {
            increment_secs: 5,
            ..MatchConfig::default()
        };
        let mut game = Match::new(config);
        play(&mut game, "2e", "4e");
        assert_eq!(game.clock(Color::White), 605);
        assert_eq!(game.clock(Color::Black), 600);
    }

    #[test]
    fn test_clock_tick_and_time_forfeit() {
        let config = MatchConfig {
            clock_secs: 2,
            ..MatchConfig::default()
        };
        let mut game = Match::new(config);
        let mut out: Recorded = Vec::new();
        assert_eq!(game.tick(1, &mut out), None);
        assert_eq!(game.clock(Color::White), 1);
        let over = game.tick(1, &mut out).unwrap();
        assert_eq!(over, GameOver::loss(Color::White, EndReason::TimeForfeit));
        assert_eq!(over.result.as_str(), "black wins");
        assert!(matches!(out.last(), Some((Audience::Everyone, Delta::GameOver(_)))));

        // Nothing is applied after the end.
        assert_eq!(
            game.apply(Actor::Local, Action::Select(tile("2e")), &mut out),
            Outcome::Rejected(Rejection::MatchOver)
        );
        assert_eq!(game.tick(1, &mut out), None);
    }

    #[test]
    fn test_resign_by_seat() {
        let mut game = Match::new(MatchConfig::default());
        let mut out: Recorded = Vec::new();
        let outcome = game.apply(Actor::Seat(Color::Black), Action::Resign, &mut out);
        assert_eq!(
            outcome.effects().unwrap().finished,
            Some(GameOver::loss(Color::Black, EndReason::Resignation))
        );
        assert!(game.is_over());
    }

    #[test]
    fn test_move_record_parse() {
        let rec = MoveRecord::parse("7a-8a=q").unwrap();
        assert_eq!(rec.promotion, Some(PieceKind::Queen));
        assert_eq!(rec.to_string(), "7a-8a=q");
        assert!(MoveRecord::parse("7a8a").is_none());
    }

    #[test]
    fn test_snapshot_resume_preserves_state() {
        let mut game = Match::new(MatchConfig::default());
        play(&mut game, "2e", "4e");
        play(&mut game, "7d", "5d");
        let snapshot = game.snapshot();
        let resumed = Match::resume(&snapshot, MatchConfig::default()).unwrap();
        assert_eq!(resumed.snapshot(), snapshot);
        assert_eq!(resumed.turn(), Color::White);
        assert!(resumed.board().piece_at(tile("5d")).unwrap().has_moved());
    }

    #[test]
    fn test_resume_keeps_en_passant_window() {
        let mut game = Match::new(MatchConfig::default());
        for (from, to) in [("2e", "4e"), ("7a", "6a"), ("4e", "5e"), ("7d", "5d")] {
            play(&mut game, from, to);
        }
        let window = game.en_passant();
        assert!(window.is_some());

        let snapshot = game.snapshot();
        assert_eq!(snapshot.en_passant, window);
        let mut resumed = Match::resume(&snapshot, MatchConfig::default()).unwrap();
        assert_eq!(resumed.en_passant(), window);
        assert_eq!(resumed.snapshot(), snapshot);

        assert!(play(&mut resumed, "5e", "6d").is_accepted());
        assert!(resumed.board().is_empty(tile("5d")));
    }

    #[test]
    fn test_resume_keeps_pending_promotion() {
        let pieces = [
            ("wk", Color::White, PieceKind::King, "1e"),
            ("wp", Color::White, PieceKind::Pawn, "7a"),
            ("bk", Color::Black, PieceKind::King, "8e"),
        ];
        let board = Board::from_pieces(
            pieces
                .iter()
                .map(|&(name, color, kind, at)| Piece::new(name, color, kind, tile(at), &StandardCatalog)),
        )
        .unwrap();
        let mut game = Match::from_position(board, Color::White, MatchConfig::default());
        play(&mut game, "7a", "8a");
        assert!(matches!(game.phase(), TurnPhase::AwaitingPromotion { .. }));

        let snapshot = game.snapshot();
        assert_eq!(snapshot.pending_promotion, Some(tile("8a")));
        let mut resumed = Match::resume(&snapshot, MatchConfig::default()).unwrap();
        assert!(matches!(resumed.phase(), TurnPhase::AwaitingPromotion { .. }));
        assert_eq!(resumed.turn(), Color::White);

        let mut out: Recorded = Vec::new();
        let promoted = resumed.apply(Actor::Local, Action::Promote(PieceKind::Queen), &mut out);
        assert!(promoted.is_accepted());
        assert_eq!(resumed.history().last().map(ToString::to_string), Some("7a-8a=q".to_string()));
        assert_eq!(resumed.turn(), Color::Black);
    }

    #[test]
    fn test_resume_rejects_inconsistent_rights() {
        let mut snapshot = Match::new(MatchConfig::default()).snapshot();
        snapshot.pending_promotion = Some(tile("2e"));
        assert_eq!(
            Match::resume(&snapshot, MatchConfig::default()).err(),
            Some(SnapshotError::BadPromotion(tile("2e")))
        );

        snapshot.pending_promotion = None;
        snapshot.en_passant = EnPassant::for_target(tile("6d"), Color::White);
        assert_eq!(
            Match::resume(&snapshot, MatchConfig::default()).err(),
            Some(SnapshotError::BadEnPassant(tile("6d")))
        );
    }

    #[test]
    fn test_resume_rejects_missing_king() {
        let mut snapshot = Match::new(MatchConfig::default()).snapshot();
        snapshot.pieces.retain(|p| p.name != "black_king");
        assert_eq!(
            Match::resume(&snapshot, MatchConfig::default()).err(),
            Some(SnapshotError::MissingKing(Color::Black))
        );
    }
}
