//! Protocol module - JSON message types for online play
//!
//! Line-delimited JSON. Every message has: type, seq (sequence number),
//! ts (timestamp in ms). Positional payloads carry both the tile name and the
//! recipient's pixel offsets (`row * scale`, `col * scale`).

use serde::{Deserialize, Serialize};

use crate::core::{Delta, MatchSnapshot};
use crate::types::{Color, GameOver, PieceKind, Tile};

pub const PROTOCOL_VERSION: &str = "1.0.0";

// ============== Client -> Server Messages ==============

/// First message on a connection; binds it to an identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloMessage {
    pub seq: u64,
    #[serde(default)]
    pub ts: u64,
    pub token: String,
    pub protocol_version: String,
    /// Pixel size of one tile on this client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
}

/// Messages that only carry the envelope (`seek`, `resign`)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BareMessage {
    pub seq: u64,
    #[serde(default)]
    pub ts: u64,
}

/// `select` and `move`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileMessage {
    pub seq: u64,
    #[serde(default)]
    pub ts: u64,
    pub tile: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoteMessage {
    pub seq: u64,
    #[serde(default)]
    pub ts: u64,
    pub piece: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RescaleMessage {
    pub seq: u64,
    #[serde(default)]
    pub ts: u64,
    pub scale: u32,
}

// ============== Server -> Client Messages ==============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WelcomeType {
    #[serde(rename = "welcome")]
    Welcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaitingType {
    #[serde(rename = "waiting")]
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchedType {
    #[serde(rename = "matched")]
    Matched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeltaType {
    #[serde(rename = "delta")]
    Delta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckType {
    #[serde(rename = "ack")]
    Ack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "rejected")]
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    #[serde(rename = "error")]
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    HandshakeRequired,
    ProtocolMismatch,
    Unauthorized,
    InvalidCommand,
    InvalidTile,
    InvalidScale,
    NotInMatch,
    AlreadyQueued,
    AlreadyInMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeMessage {
    #[serde(rename = "type")]
    pub msg_type: WelcomeType,
    pub seq: u64,
    pub ts: u64,
    pub protocol_version: String,
    pub player_id: String,
    pub name: String,
    /// Set when the hello reattached this connection to a running match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejoined: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitingMessage {
    #[serde(rename = "type")]
    pub msg_type: WaitingType,
    pub seq: u64,
    pub ts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedMessage {
    #[serde(rename = "type")]
    pub msg_type: MatchedType,
    pub seq: u64,
    pub ts: u64,
    pub match_id: String,
    pub color: String,
    pub opponent: String,
    pub clock_secs: u32,
    pub increment_secs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckMessage {
    #[serde(rename = "type")]
    pub msg_type: AckType,
    pub seq: u64,
    pub ts: u64,
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    #[serde(rename = "type")]
    pub msg_type: ErrorType,
    pub seq: u64,
    pub ts: u64,
    pub code: ErrorCode,
    pub message: String,
}

/// A tile in the recipient's coordinate space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaledTile {
    pub tile: String,
    pub top: u32,
    pub left: u32,
}

impl ScaledTile {
    pub fn new(tile: Tile, scale: u32) -> Self {
        let (top, left) = tile.scaled(scale);
        Self {
            tile: tile.name().to_string(),
            top,
            left,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedPiece {
    pub name: String,
    pub color: String,
    pub kind: String,
    pub visual: String,
    pub moved: bool,
    #[serde(flatten)]
    pub at: ScaledTile,
}

/// Event payload of a `delta` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeltaBody {
    Selected {
        piece: String,
        at: ScaledTile,
        destinations: Vec<ScaledTile>,
    },
    Deselected {
        piece: String,
        at: ScaledTile,
    },
    Moved {
        piece: String,
        from: ScaledTile,
        to: ScaledTile,
    },
    Removed {
        piece: String,
        at: ScaledTile,
    },
    Captured {
        by: String,
        kind: String,
        visual: String,
    },
    PromotionPending {
        piece: String,
        at: ScaledTile,
        color: String,
    },
    Promoted {
        piece: String,
        at: ScaledTile,
        kind: String,
        visual: String,
    },
    Check {
        color: String,
        king: ScaledTile,
        attackers: Vec<ScaledTile>,
        resolving: Vec<ScaledTile>,
    },
    CheckCleared {
        color: String,
        king: ScaledTile,
    },
    Clock {
        white_secs: u32,
        black_secs: u32,
        active: String,
    },
    Position {
        turn: String,
        pieces: Vec<PlacedPiece>,
        white_secs: u32,
        black_secs: u32,
        since_capture: u16,
        captured_by_white: Vec<String>,
        captured_by_black: Vec<String>,
        moves: Vec<String>,
    },
    GameOver {
        result: String,
        score: String,
        reason: String,
    },
    /// The opponent's connection dropped or came back
    Opponent {
        connected: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        grace_secs: Option<u32>,
    },
}

impl DeltaBody {
    /// Render a core delta in a recipient's coordinate space
    pub fn from_delta(delta: &Delta, scale: u32) -> Self {
        let at = |t: Tile| ScaledTile::new(t, scale);
        let all = |ts: &Vec<Tile>| scaled_all(ts, scale);
        match delta {
            Delta::Selected {
                piece,
                tile,
                destinations,
            } => DeltaBody::Selected {
                piece: piece.clone(),
                at: at(*tile),
                destinations: all(destinations),
            },
            Delta::Deselected { piece, tile } => DeltaBody::Deselected {
                piece: piece.clone(),
                at: at(*tile),
            },
            Delta::Moved { piece, from, to } => DeltaBody::Moved {
                piece: piece.clone(),
                from: at(*from),
                to: at(*to),
            },
            Delta::Removed { piece, tile } => DeltaBody::Removed {
                piece: piece.clone(),
                at: at(*tile),
            },
            Delta::Captured { by, kind, visual } => DeltaBody::Captured {
                by: by.as_str().to_string(),
                kind: kind.as_str().to_string(),
                visual: visual.to_string(),
            },
            Delta::PromotionPending { piece, tile, color } => DeltaBody::PromotionPending {
                piece: piece.clone(),
                at: at(*tile),
                color: color.as_str().to_string(),
            },
            Delta::Promoted {
                piece,
                tile,
                kind,
                visual,
            } => DeltaBody::Promoted {
                piece: piece.clone(),
                at: at(*tile),
                kind: kind.as_str().to_string(),
                visual: visual.to_string(),
            },
            Delta::Check {
                color,
                king,
                attackers,
                resolving,
            } => DeltaBody::Check {
                color: color.as_str().to_string(),
                king: at(*king),
                attackers: all(attackers),
                resolving: all(resolving),
            },
            Delta::CheckCleared { color, king } => DeltaBody::CheckCleared {
                color: color.as_str().to_string(),
                king: at(*king),
            },
            Delta::Clock {
                white_secs,
                black_secs,
                active,
            } => DeltaBody::Clock {
                white_secs: *white_secs,
                black_secs: *black_secs,
                active: active.as_str().to_string(),
            },
            Delta::Position(snapshot) => position_body(snapshot, scale),
            Delta::GameOver(over) => game_over_body(*over),
        }
    }

    pub fn event(&self) -> &'static str {
        match self {
            DeltaBody::Selected { .. } => "selected",
            DeltaBody::Deselected { .. } => "deselected",
            DeltaBody::Moved { .. } => "moved",
            DeltaBody::Removed { .. } => "removed",
            DeltaBody::Captured { .. } => "captured",
            DeltaBody::PromotionPending { .. } => "promotion_pending",
            DeltaBody::Promoted { .. } => "promoted",
            DeltaBody::Check { .. } => "check",
            DeltaBody::CheckCleared { .. } => "check_cleared",
            DeltaBody::Clock { .. } => "clock",
            DeltaBody::Position { .. } => "position",
            DeltaBody::GameOver { .. } => "game_over",
            DeltaBody::Opponent { .. } => "opponent",
        }
    }
}

fn scaled_all(tiles: &[Tile], scale: u32) -> Vec<ScaledTile> {
    tiles.iter().map(|t| ScaledTile::new(*t, scale)).collect()
}

fn kind_names(kinds: &[PieceKind]) -> Vec<String> {
    kinds.iter().map(|k| k.as_str().to_string()).collect()
}

fn position_body(snapshot: &MatchSnapshot, scale: u32) -> DeltaBody {
    DeltaBody::Position {
        turn: snapshot.turn.as_str().to_string(),
        pieces: snapshot
            .pieces
            .iter()
            .map(|p| PlacedPiece {
                name: p.name.clone(),
                color: p.color.as_str().to_string(),
                kind: p.kind.as_str().to_string(),
                visual: p.visual.to_string(),
                moved: p.moved,
                at: ScaledTile::new(p.tile, scale),
            })
            .collect(),
        white_secs: snapshot.clock(Color::White),
        black_secs: snapshot.clock(Color::Black),
        since_capture: snapshot.since_capture,
        captured_by_white: kind_names(snapshot.captured_by(Color::White)),
        captured_by_black: kind_names(snapshot.captured_by(Color::Black)),
        moves: snapshot.moves.clone(),
    }
}

fn game_over_body(over: GameOver) -> DeltaBody {
    DeltaBody::GameOver {
        result: over.result.as_str().to_string(),
        score: over.result.score().to_string(),
        reason: over.reason.as_str().to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaMessage {
    #[serde(rename = "type")]
    pub msg_type: DeltaType,
    pub seq: u64,
    pub ts: u64,
    pub match_id: String,
    #[serde(flatten)]
    pub body: DeltaBody,
}

// ============== Message Parsing ==============

/// Parse a JSON message from a string
pub fn parse_message(json: &str) -> Result<ParsedMessage, serde_json::Error> {
    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    enum InboundMessage {
        Hello(HelloMessage),
        Seek(BareMessage),
        Select(TileMessage),
        Move(TileMessage),
        Promote(PromoteMessage),
        Resign(BareMessage),
        Rescale(RescaleMessage),
    }

    match serde_json::from_str::<InboundMessage>(json) {
        Ok(InboundMessage::Hello(m)) => Ok(ParsedMessage::Hello(m)),
        Ok(InboundMessage::Seek(m)) => Ok(ParsedMessage::Seek(m)),
        Ok(InboundMessage::Select(m)) => Ok(ParsedMessage::Select(m)),
        Ok(InboundMessage::Move(m)) => Ok(ParsedMessage::Move(m)),
        Ok(InboundMessage::Promote(m)) => Ok(ParsedMessage::Promote(m)),
        Ok(InboundMessage::Resign(m)) => Ok(ParsedMessage::Resign(m)),
        Ok(InboundMessage::Rescale(m)) => Ok(ParsedMessage::Rescale(m)),
        Err(e) => {
            // Unknown message type is not a hard parse error for the protocol.
            #[derive(Debug, Deserialize)]
            struct Envelope<'a> {
                #[serde(rename = "type")]
                msg_type: Option<&'a str>,
                seq: Option<u64>,
            }
            let envelope = serde_json::from_str::<Envelope>(json)?;
            let known = matches!(
                envelope.msg_type,
                Some("hello" | "seek" | "select" | "move" | "promote" | "resign" | "rescale")
            );
            if known {
                return Err(e);
            }
            Ok(ParsedMessage::Unknown(UnknownMessage {
                seq: envelope.seq.unwrap_or(0),
            }))
        }
    }
}

/// Parsed incoming message
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    Hello(HelloMessage),
    Seek(BareMessage),
    Select(TileMessage),
    Move(TileMessage),
    Promote(PromoteMessage),
    Resign(BareMessage),
    Rescale(RescaleMessage),
    Unknown(UnknownMessage),
}

impl ParsedMessage {
    pub fn seq(&self) -> u64 {
        match self {
            ParsedMessage::Hello(m) => m.seq,
            ParsedMessage::Seek(m) | ParsedMessage::Resign(m) => m.seq,
            ParsedMessage::Select(m) | ParsedMessage::Move(m) => m.seq,
            ParsedMessage::Promote(m) => m.seq,
            ParsedMessage::Rescale(m) => m.seq,
            ParsedMessage::Unknown(m) => m.seq,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownMessage {
    pub seq: u64,
}

/// Best-effort `seq` from a line that failed to parse
pub fn extract_seq_best_effort(s: &str) -> Option<u64> {
    let start = s.find("\"seq\"")?;
    let after_key = &s[start + 5..];
    let colon = after_key.find(':')?;
    let rest = after_key[colon + 1..].trim_start();
    let end = rest.bytes().take_while(u8::is_ascii_digit).count();
    if end == 0 {
        return None;
    }
    rest[..end].parse::<u64>().ok()
}

// ============== Utility Functions ==============

/// Create a hello message
pub fn create_hello(seq: u64, token: &str, scale: Option<u32>) -> HelloMessage {
    HelloMessage {
        seq,
        ts: current_timestamp_ms(),
        token: token.to_string(),
        protocol_version: PROTOCOL_VERSION.to_string(),
        scale,
    }
}

pub fn create_welcome(
    seq: u64,
    player_id: &str,
    name: &str,
    rejoined: Option<String>,
) -> WelcomeMessage {
    WelcomeMessage {
        msg_type: WelcomeType::Welcome,
        seq,
        ts: current_timestamp_ms(),
        protocol_version: PROTOCOL_VERSION.to_string(),
        player_id: player_id.to_string(),
        name: name.to_string(),
        rejoined,
    }
}

pub fn create_waiting(seq: u64) -> WaitingMessage {
    WaitingMessage {
        msg_type: WaitingType::Waiting,
        seq,
        ts: current_timestamp_ms(),
    }
}

pub fn create_matched(
    seq: u64,
    match_id: &str,
    color: Color,
    opponent: &str,
    clock_secs: u32,
    increment_secs: u32,
) -> MatchedMessage {
    MatchedMessage {
        msg_type: MatchedType::Matched,
        seq,
        ts: current_timestamp_ms(),
        match_id: match_id.to_string(),
        color: color.as_str().to_string(),
        opponent: opponent.to_string(),
        clock_secs,
        increment_secs,
    }
}

pub fn create_delta(seq: u64, match_id: &str, body: DeltaBody) -> DeltaMessage {
    DeltaMessage {
        msg_type: DeltaType::Delta,
        seq,
        ts: current_timestamp_ms(),
        match_id: match_id.to_string(),
        body,
    }
}

/// Create an acknowledgment
pub fn create_ack(seq: u64) -> AckMessage {
    AckMessage {
        msg_type: AckType::Ack,
        seq,
        ts: current_timestamp_ms(),
        status: AckStatus::Ok,
        reason: None,
    }
}

/// Acknowledge a well-formed action that the rules refused
pub fn create_rejection(seq: u64, reason: &str) -> AckMessage {
    AckMessage {
        msg_type: AckType::Ack,
        seq,
        ts: current_timestamp_ms(),
        status: AckStatus::Rejected,
        reason: Some(reason.to_string()),
    }
}

/// Create an error message
pub fn create_error(seq: u64, code: ErrorCode, message: &str) -> ErrorMessage {
    ErrorMessage {
        msg_type: ErrorType::Error,
        seq,
        ts: current_timestamp_ms(),
        code,
        message: message.to_string(),
    }
}

/// Get current timestamp in milliseconds
pub(crate) fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
