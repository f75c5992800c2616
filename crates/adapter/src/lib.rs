//! Adapter module - online play over a TCP socket with a JSON protocol
//!
//! This crate puts the pure rules engine on the network. Two players connect,
//! identify themselves, get paired by the matchmaking queue and then play
//! through a per-match mutex. Every state change is pushed to both players as
//! a delta whose coordinates are scaled to each recipient's own board size.
//!
//! # Protocol Overview
//!
//! The adapter implements a **line-delimited JSON protocol** over TCP:
//!
//! 1. **Connection**: Client connects to TCP socket (default: 127.0.0.1:7878)
//! 2. **Handshake**: Client sends `hello`, server responds with `welcome`
//! 3. **Matchmaking**: Client sends `seek`; the server answers `waiting` or,
//!    once a second player seeks, sends `matched` to both
//! 4. **Play**: The side to move sends `select`/`move`/`promote`/`resign`;
//!    every command is answered with an `ack` (`ok` or `rejected` + reason)
//! 5. **Deltas**: Both players receive `delta` messages for every change
//!
//! # Message Types
//!
//! ## Client → Server
//!
//! - **hello**: token, protocol version, optional tile scale
//! - **seek**: join the matchmaking queue
//! - **select** / **move**: a tile name such as `"2e"` (rank first)
//! - **promote**: `queen`, `rook`, `bishop` or `knight`
//! - **resign**: concede the match
//! - **rescale**: change the tile scale and receive a fresh position
//!
//! ## Server → Client
//!
//! - **welcome**: the player id; `rejoined` names a match resumed after a drop
//! - **waiting** / **matched**: matchmaking progress
//! - **delta**: one event (`moved`, `captured`, `check`, `clock`, ...)
//! - **ack**: command acknowledgment
//! - **error**: error response with code and message
//!
//! # Environment Variables
//!
//! - `CHESS_HOST`: Bind address (default: "127.0.0.1")
//! - `CHESS_PORT`: Port number (default: 7878)
//! - `CHESS_TIME_CONTROL`: `base+increment` in seconds (default: "600+0")
//! - `CHESS_TICK_MS`: Clock driver period (default: 1000)
//! - `CHESS_RECONNECT_SECS`: Rejoin grace after a drop (default: 30)
//! - `CHESS_DEFAULT_SCALE`: Tile scale when `hello` has none (default: 80)
//! - `CHESS_WIRE_LOG`: Append raw JSON lines to this file
//! - `CHESS_STORE_PATH`: Append match snapshots to this JSONL file
//!
//! # Example Protocol Flow
//!
//! ```text
//! Client -> Server: {"type":"hello","seq":1,"ts":0,"token":"alice","protocol_version":"1.0.0","scale":10}
//! Server -> Client: {"type":"welcome","seq":1,"ts":1700000000000,"protocol_version":"1.0.0","player_id":"...","name":"alice"}
//! Client -> Server: {"type":"seek","seq":2,"ts":0}
//! Server -> Client: {"type":"matched","seq":1,"match_id":"...","color":"white","opponent":"bob",...}
//! Client -> Server: {"type":"select","seq":3,"ts":0,"tile":"2e"}
//! Server -> Client: {"type":"delta","seq":3,"event":"selected","piece":"white_pawn_e","at":{"tile":"2e","top":60,"left":40},...}
//! Server -> Client: {"type":"ack","seq":3,"ts":1700000000050,"status":"ok"}
//! ```
//!
//! # Implementation
//!
//! - Uses **tokio** for async networking
//! - See [`protocol`] for message structure definitions
//! - See [`relay`] for per-recipient delivery, clocks and reconnect grace
//! - See [`server`] for the TCP server implementation
//! - [`auth`] and [`store`] are the identity and persistence collaborators
//!
//! # Testing
//!
//! Connect to the server using netcat for manual testing:
//!
//! ```bash
//! nc 127.0.0.1 7878
//! {"type":"hello","seq":1,"token":"alice","protocol_version":"1.0.0"}
//! ```

pub mod auth;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod store;

pub use chess_live_core as core;
pub use chess_live_types as types;

// Re-export protocol types for convenience
pub use protocol::*;
pub use registry::{MatchId, MatchRepository, PlayerId};
pub use relay::{LocalSink, MatchRoom, OnlineSession, PeerHandle};
pub use server::*;
