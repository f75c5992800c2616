//! Core rules module - pure, deterministic, and testable
//!
//! This crate contains the chess rules, the match state machine, and the
//! matchmaking queue. It has **no dependencies** on networking or I/O:
//!
//! - **Deterministic**: the same actions always produce the same deltas
//! - **Testable**: every rule is covered by unit tests next to its code
//! - **Side-effect free trials**: king-safety checks mutate and restore the board
//!
//! # Module Structure
//!
//! - [`board`]: 8x8 squares plus the piece registry, kept in lockstep
//! - [`pieces`]: piece identity, movement templates, and the [`PieceCatalog`]
//! - [`movegen`]: pseudo-legal destinations, pawn special cases, en passant
//! - [`check`]: attack scan from a king, trial moves, castle-path safety
//! - [`rules`]: insufficient material and repetition keys
//! - [`game_state`]: the [`Match`] turn state machine
//! - [`delta`]: what changed, and the [`DeliverySink`] it is handed to
//! - [`snapshot`]: plain-data views for persistence and resync
//! - [`queue`]: the two-player matchmaking queue
//!
//! # Example
//!
//! ```
//! use chess_live_core::{Action, Actor, Match, NullSink};
//! use chess_live_types::{Color, MatchConfig, Tile};
//!
//! let mut game = Match::new(MatchConfig::default());
//! let e2 = Tile::from_name("2e").unwrap();
//! let e4 = Tile::from_name("4e").unwrap();
//!
//! let mut sink = NullSink;
//! game.apply(Actor::Local, Action::Select(e2), &mut sink);
//! let outcome = game.apply(Actor::Local, Action::MoveTo(e4), &mut sink);
//!
//! assert!(outcome.is_accepted());
//! assert_eq!(game.turn(), Color::Black);
//! ```

pub mod board;
pub mod check;
pub mod delta;
pub mod game_state;
pub mod movegen;
pub mod pieces;
pub mod queue;
pub mod rules;
pub mod snapshot;

pub use chess_live_types as types;

pub use board::{Board, BoardError, PieceId, Square};
pub use check::CheckReport;
pub use delta::{Audience, DeliverySink, Delta, NullSink};
pub use game_state::{
    Action, Actor, Effects, Match, MoveRecord, Outcome, Rejection, SnapshotError, TurnPhase,
};
pub use movegen::{Destination, DestinationKind, Destinations, EnPassant};
pub use pieces::{Piece, PieceCatalog, StandardCatalog};
pub use queue::{PlayersQueue, QueueError, QueueState};
pub use snapshot::{MatchSnapshot, PieceRecord};
