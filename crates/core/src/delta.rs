//! State deltas and the delivery sink
//!
//! The turn state machine describes every visible change as a [`Delta`] and
//! hands it to a [`DeliverySink`] together with its [`Audience`]. Local play
//! and online sessions differ only in the sink they pass in.

use crate::snapshot::MatchSnapshot;
use crate::types::{Color, GameOver, PieceKind, Tile};

/// Who should see a delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    /// Only the player whose action produced it (selection, prompts)
    Actor,
    /// Both players
    Everyone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    /// A piece was selected; its legal destinations should be highlighted
    Selected {
        piece: String,
        tile: Tile,
        destinations: Vec<Tile>,
    },
    Deselected {
        piece: String,
        tile: Tile,
    },
    Moved {
        piece: String,
        from: Tile,
        to: Tile,
    },
    /// A piece left the board
    Removed {
        piece: String,
        tile: Tile,
    },
    /// `by` added a piece to its capture list
    Captured {
        by: Color,
        kind: PieceKind,
        visual: &'static str,
    },
    PromotionPending {
        piece: String,
        tile: Tile,
        color: Color,
    },
    Promoted {
        piece: String,
        tile: Tile,
        kind: PieceKind,
        visual: &'static str,
    },
    Check {
        color: Color,
        king: Tile,
        attackers: Vec<Tile>,
        resolving: Vec<Tile>,
    },
    CheckCleared {
        color: Color,
        king: Tile,
    },
    Clock {
        white_secs: u32,
        black_secs: u32,
        active: Color,
    },
    /// Full position, sent on match start, rejoin, and rescale
    Position(MatchSnapshot),
    GameOver(GameOver),
}

impl Delta {
    /// Short event name used by logs and the wire protocol
    pub fn event(&self) -> &'static str {
        match self {
            Delta::Selected { .. } => "selected",
            Delta::Deselected { .. } => "deselected",
            Delta::Moved { .. } => "moved",
            Delta::Removed { .. } => "removed",
            Delta::Captured { .. } => "captured",
            Delta::PromotionPending { .. } => "promotion_pending",
            Delta::Promoted { .. } => "promoted",
            Delta::Check { .. } => "check",
            Delta::CheckCleared { .. } => "check_cleared",
            Delta::Clock { .. } => "clock",
            Delta::Position(_) => "position",
            Delta::GameOver(_) => "game_over",
        }
    }
}

/// Receives deltas from the turn state machine.
pub trait DeliverySink {
    fn emit(&mut self, audience: Audience, delta: Delta);
}

/// Collects deltas in order; used by tests and by callers that batch.
impl DeliverySink for Vec<(Audience, Delta)> {
    fn emit(&mut self, audience: Audience, delta: Delta) {
        self.push((audience, delta));
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DeliverySink for NullSink {
    fn emit(&mut self, _audience: Audience, _delta: Delta) {}
}
