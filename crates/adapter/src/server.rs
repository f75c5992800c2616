//! TCP server for online matches
//!
//! Accepts connections, runs the hello handshake, pairs seekers through the
//! matchmaking queue and routes match actions to the owning [`MatchRoom`].
//! Uses tokio for async networking.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::auth::{Authorizer, GuestAuthorizer, Identity};
use crate::core::{Action, Match, Outcome, PlayersQueue};
use crate::protocol::*;
use crate::registry::{MatchId, MatchRepository, PlayerId};
use crate::relay::{spawn_clock, ClientOutbound, MatchRoom, OnlineSession, PeerHandle, Seat};
use crate::store::{JsonlStore, MatchStore, NullStore};
use crate::types::{
    Color, MatchConfig, PieceKind, Tile, CLOCK_TICK_MS, DEFAULT_SCALE, MAX_SCALE,
    RECONNECT_GRACE_SECS,
};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub match_config: MatchConfig,
    pub tick_ms: u64,
    pub reconnect_grace_secs: u32,
    pub default_scale: u32,
    pub wire_log_path: Option<String>,
    pub store_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7878,
            match_config: MatchConfig::default(),
            tick_ms: CLOCK_TICK_MS,
            reconnect_grace_secs: RECONNECT_GRACE_SECS,
            default_scale: DEFAULT_SCALE,
            wire_log_path: None,
            store_path: None,
        }
    }
}

impl ServerConfig {
    /// Create from `CHESS_*` environment variables; unset or unparsable values
    /// keep their defaults.
    pub fn from_env() -> Self {
        use std::env;

        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
        }
        fn path(key: &str) -> Option<String> {
            std::env::var(key)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        }

        let defaults = Self::default();
        let match_config = match env::var("CHESS_TIME_CONTROL") {
            Ok(tc) => MatchConfig::from_time_control(&tc).unwrap_or_else(|| {
                warn!(time_control = %tc, "ignoring malformed CHESS_TIME_CONTROL");
                defaults.match_config
            }),
            Err(_) => defaults.match_config,
        };

        Self {
            host: env::var("CHESS_HOST").unwrap_or(defaults.host),
            port: parsed::<u16>("CHESS_PORT").unwrap_or(defaults.port),
            match_config,
            tick_ms: parsed::<u64>("CHESS_TICK_MS")
                .filter(|ms| *ms > 0)
                .unwrap_or(defaults.tick_ms),
            reconnect_grace_secs: parsed::<u32>("CHESS_RECONNECT_SECS")
                .unwrap_or(defaults.reconnect_grace_secs),
            default_scale: parsed::<u32>("CHESS_DEFAULT_SCALE")
                .filter(|s| check_scale(*s).is_ok())
                .unwrap_or(defaults.default_scale),
            wire_log_path: path("CHESS_WIRE_LOG"),
            store_path: path("CHESS_STORE_PATH"),
        }
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid socket address {}:{}", self.host, self.port))
    }
}

/// Identity and persistence services the server delegates to
#[derive(Clone)]
pub struct Collaborators {
    pub authorizer: Arc<dyn Authorizer>,
    pub store: Arc<dyn MatchStore>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            authorizer: Arc::new(GuestAuthorizer::new()),
            store: Arc::new(NullStore),
        }
    }
}

impl Collaborators {
    /// Guest identities plus a JSONL store when `store_path` is set. Must be
    /// called inside a tokio runtime.
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut collaborators = Self::default();
        if let Some(path) = config.store_path.clone() {
            info!(%path, "persisting match snapshots");
            collaborators.store = Arc::new(JsonlStore::spawn(path));
        }
        collaborators
    }
}

/// A seeker parked in the matchmaking queue
struct Waiting {
    player: PlayerId,
    name: String,
    scale: u32,
    peer: Arc<PeerHandle>,
}

enum SeekResult {
    Waiting,
    AlreadyQueued,
    Paired(Waiting, Waiting),
}

/// Shared server state
pub struct ServerState {
    config: ServerConfig,
    collaborators: Collaborators,
    queue: Mutex<PlayersQueue<Waiting>>,
    matches: Arc<MatchRepository>,
}

impl ServerState {
    pub fn new(config: ServerConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            queue: Mutex::new(PlayersQueue::new()),
            matches: Arc::new(MatchRepository::new()),
        }
    }

    pub fn matches(&self) -> &Arc<MatchRepository> {
        &self.matches
    }

    /// Queue a seeker; pair the first two and start over with a fresh queue.
    fn seek(&self, me: Waiting) -> SeekResult {
        let mut queue = self.queue.lock();
        if queue.iter().any(|w| w.player == me.player) {
            return SeekResult::AlreadyQueued;
        }
        if queue.is_done() {
            *queue = PlayersQueue::new();
        }
        queue.enqueue(me);
        if !queue.is_full() {
            return SeekResult::Waiting;
        }
        let pair = match (queue.dequeue(), queue.dequeue()) {
            (Ok(white), Ok(black)) => SeekResult::Paired(white, black),
            _ => SeekResult::Waiting,
        };
        *queue = PlayersQueue::new();
        pair
    }

    /// Drop a disconnected seeker from the queue
    fn cancel_seek(&self, conn_id: u64) -> bool {
        self.queue
            .lock()
            .remove_where(|w| w.peer.id() == conn_id)
            .is_some()
    }

    fn is_queued(&self, player: PlayerId) -> bool {
        self.queue.lock().iter().any(|w| w.player == player)
    }
}

/// Start the TCP server
pub async fn run_server(
    config: ServerConfig,
    collaborators: Collaborators,
    ready_tx: Option<oneshot::Sender<SocketAddr>>,
) -> anyhow::Result<()> {
    let wire_log_tx: Option<mpsc::UnboundedSender<Vec<u8>>> =
        if let Some(path) = config.wire_log_path.clone() {
            let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
            tokio::spawn(async move {
                use tokio::fs::OpenOptions;

                let mut file = match OpenOptions::new().create(true).append(true).open(&path).await
                {
                    Ok(f) => f,
                    Err(e) => {
                        warn!(%path, error = %e, "wire log unavailable");
                        return;
                    }
                };
                while let Some(mut line) = rx.recv().await {
                    if line.last() != Some(&b'\n') {
                        line.push(b'\n');
                    }
                    if file.write_all(&line).await.is_err() {
                        break;
                    }
                }
                let _ = file.flush().await;
            });
            Some(tx)
        } else {
            None
        };

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    let bound = listener.local_addr()?;
    info!(%bound, "chess server listening");
    if let Some(tx) = ready_tx {
        let _ = tx.send(bound);
    }

    let state = Arc::new(ServerState::new(config, collaborators));
    let conn_counter = AtomicU64::new(0);

    loop {
        let (socket, addr) = listener.accept().await?;
        let conn_id = conn_counter.fetch_add(1, Ordering::Relaxed) + 1;
        info!(conn_id, %addr, "client connected");

        let state = Arc::clone(&state);
        let wire_log_tx = wire_log_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(socket, conn_id, state, wire_log_tx).await {
                warn!(conn_id, error = %e, "client error");
            }
            info!(conn_id, "client disconnected");
        });
    }
}

/// Per-connection protocol state
struct ClientSession {
    handshaken: bool,
    last_seq: Option<u64>,
    identity: Option<Identity>,
    scale: u32,
}

impl ClientSession {
    fn check_and_update_seq(&mut self, seq: u64) -> bool {
        match self.last_seq {
            Some(prev) if seq <= prev => false,
            _ => {
                self.last_seq = Some(seq);
                true
            }
        }
    }
}

/// Handle a single client connection
async fn handle_client(
    socket: TcpStream,
    conn_id: u64,
    state: Arc<ServerState>,
    wire_log_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = tokio::io::split(socket);
    let mut reader = BufReader::new(reader);

    let (tx, mut rx) = mpsc::unbounded_channel::<ClientOutbound>();
    let peer = Arc::new(PeerHandle::new(conn_id, tx));

    let wire_log_tx_out = wire_log_tx.clone();
    let write_task = tokio::spawn(async move {
        let mut buf: Vec<u8> = Vec::with_capacity(4096);
        while let Some(msg) = rx.recv().await {
            match msg.encode(&mut buf) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!(conn_id, error = %e, "encode failed");
                    continue;
                }
            }
            buf.push(b'\n');
            if writer.write_all(&buf).await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
            if let Some(tx) = wire_log_tx_out.as_ref() {
                let _ = tx.send(buf.clone());
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut client = ClientSession {
        handshaken: false,
        last_seq: None,
        identity: None,
        scale: state.config.default_scale,
    };
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = tokio::select! {
            read = reader.read_line(&mut line) => read?,
            _ = peer.closed() => break,
        };
        if bytes_read == 0 {
            break;
        }

        let raw_line = line.trim_end_matches(|c| c == '\n' || c == '\r');
        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(tx) = wire_log_tx.as_ref() {
            let _ = tx.send(raw_line.as_bytes().to_vec());
        }

        let msg = match parse_message(trimmed) {
            Ok(msg) => msg,
            Err(e) => {
                let seq = extract_seq_best_effort(trimmed).unwrap_or(0);
                let error = create_error(seq, ErrorCode::InvalidCommand, &format!("Parse error: {e}"));
                let _ = peer.send(ClientOutbound::Error(error));
                continue;
            }
        };
        let seq = msg.seq();

        let msg = match msg {
            ParsedMessage::Hello(hello) => match on_hello(&state, &peer, &mut client, hello).await {
                HelloResult::Continue => continue,
                HelloResult::Disconnect => break,
            },
            other => other,
        };

        if !client.handshaken {
            let error = create_error(seq, ErrorCode::HandshakeRequired, "Send hello first");
            let _ = peer.send(ClientOutbound::Error(error));
            continue;
        }
        if !client.check_and_update_seq(seq) {
            let error = create_error(seq, ErrorCode::InvalidCommand, "seq must be strictly increasing");
            let _ = peer.send(ClientOutbound::Error(error));
            continue;
        }
        let Some(identity) = client.identity.clone() else {
            continue;
        };

        match msg {
            ParsedMessage::Hello(_) => {}
            ParsedMessage::Seek(_) => on_seek(&state, &peer, &client, &identity, seq).await,
            ParsedMessage::Select(m) => match parse_tile(&m.tile) {
                Ok(tile) => on_action(&state, &peer, &identity, seq, Action::Select(tile)).await,
                Err(error) => reply_error(&peer, seq, error),
            },
            ParsedMessage::Move(m) => match parse_tile(&m.tile) {
                Ok(tile) => on_action(&state, &peer, &identity, seq, Action::MoveTo(tile)).await,
                Err(error) => reply_error(&peer, seq, error),
            },
            ParsedMessage::Promote(m) => match PieceKind::from_str(&m.piece) {
                Some(kind) => on_action(&state, &peer, &identity, seq, Action::Promote(kind)).await,
                None => reply_error(
                    &peer,
                    seq,
                    (ErrorCode::InvalidCommand, format!("Unknown piece: {}", m.piece)),
                ),
            },
            ParsedMessage::Resign(_) => {
                on_action(&state, &peer, &identity, seq, Action::Resign).await
            }
            ParsedMessage::Rescale(m) => {
                if let Err(error) = check_scale(m.scale) {
                    reply_error(&peer, seq, error);
                    continue;
                }
                client.scale = m.scale;
                if let Some((_, room)) = state.matches.find_player(identity.player).await {
                    let _ = room.lock().rescale(identity.player, m.scale);
                }
                let _ = peer.send(ClientOutbound::Ack(create_ack(seq)));
            }
            ParsedMessage::Unknown(_) => reply_error(
                &peer,
                seq,
                (ErrorCode::InvalidCommand, "Unknown message type".into()),
            ),
        }
    }

    if state.cancel_seek(conn_id) {
        debug!(conn_id, "search cancelled");
    }
    if let Some(identity) = client.identity.as_ref() {
        if let Some((_, room)) = state.matches.find_player(identity.player).await {
            room.lock().disconnect(identity.player, conn_id);
        }
    }

    peer.close();
    let _ = write_task.await;
    Ok(())
}

enum HelloResult {
    Continue,
    Disconnect,
}

async fn on_hello(
    state: &Arc<ServerState>,
    peer: &Arc<PeerHandle>,
    client: &mut ClientSession,
    hello: HelloMessage,
) -> HelloResult {
    if client.handshaken {
        let seq_ok = client.check_and_update_seq(hello.seq);
        let message = if seq_ok {
            "Already handshaken"
        } else {
            "seq must be strictly increasing"
        };
        let error = create_error(hello.seq, ErrorCode::InvalidCommand, message);
        let _ = peer.send(ClientOutbound::Error(error));
        return HelloResult::Continue;
    }

    if !hello.protocol_version.starts_with("1.") {
        let error = create_error(
            hello.seq,
            ErrorCode::ProtocolMismatch,
            &format!("Protocol version {} not supported", hello.protocol_version),
        );
        let _ = peer.send(ClientOutbound::Error(error));
        return HelloResult::Disconnect;
    }
    if let Some(Err(error)) = hello.scale.map(check_scale) {
        reply_error(peer, hello.seq, error);
        return HelloResult::Continue;
    }

    let identity = match state.collaborators.authorizer.authenticate(&hello.token) {
        Ok(identity) => identity,
        Err(e) => {
            let error = create_error(hello.seq, ErrorCode::Unauthorized, &e.to_string());
            let _ = peer.send(ClientOutbound::Error(error));
            return HelloResult::Continue;
        }
    };

    client.handshaken = true;
    client.last_seq = Some(hello.seq);
    if let Some(scale) = hello.scale {
        client.scale = scale;
    }
    info!(conn_id = peer.id(), player = %identity.player, name = %identity.name, "handshake");

    let mut running = state.matches.find_player(identity.player).await;
    if running
        .as_ref()
        .is_some_and(|(_, room)| room.lock().is_over())
    {
        running = None;
    }
    let welcome = create_welcome(
        hello.seq,
        &identity.player.to_string(),
        &identity.name,
        running.as_ref().map(|(id, _)| id.to_string()),
    );
    let _ = peer.send(ClientOutbound::Welcome(welcome));

    if let Some((id, room)) = running {
        let rejoined = room
            .lock()
            .rejoin(identity.player, Arc::clone(peer), hello.scale);
        if let Err(e) = rejoined {
            warn!(match_id = %id, error = %e, "rejoin failed");
        }
    }
    client.identity = Some(identity);
    HelloResult::Continue
}

async fn on_seek(
    state: &Arc<ServerState>,
    peer: &Arc<PeerHandle>,
    client: &ClientSession,
    identity: &Identity,
    seq: u64,
) {
    if let Some((_, room)) = state.matches.find_player(identity.player).await {
        let over = room.lock().is_over();
        if !over {
            reply_error(peer, seq, (ErrorCode::AlreadyInMatch, "Already in a match".into()));
            return;
        }
    }

    let me = Waiting {
        player: identity.player,
        name: identity.name.clone(),
        scale: client.scale,
        peer: Arc::clone(peer),
    };
    match state.seek(me) {
        SeekResult::AlreadyQueued => {
            reply_error(peer, seq, (ErrorCode::AlreadyQueued, "Already searching".into()));
        }
        SeekResult::Waiting => {
            debug!(player = %identity.player, "waiting for opponent");
            let _ = peer.send(ClientOutbound::Waiting(create_waiting(seq)));
        }
        SeekResult::Paired(white, black) => start_match(state, white, black).await,
    }
}

async fn start_match(state: &Arc<ServerState>, white: Waiting, black: Waiting) {
    let id = MatchId::new();
    let config = state.config.match_config;
    info!(match_id = %id, white = %white.name, black = %black.name, "match paired");

    let announce = [
        (Arc::clone(&white.peer), Color::White, black.name.clone()),
        (Arc::clone(&black.peer), Color::Black, white.name.clone()),
    ];
    let session = OnlineSession::new(
        id,
        Seat::new(white.player, white.name, white.scale, white.peer),
        Seat::new(black.player, black.name, black.scale, black.peer),
    );
    let room = MatchRoom::new(
        Match::new(config),
        session,
        Arc::clone(&state.collaborators.store),
        Duration::from_secs(u64::from(state.config.reconnect_grace_secs)),
    );
    // Registered before anyone hears of it, so an immediate command finds the room.
    let room = state.matches.insert(room).await;
    for (peer, color, opponent) in announce {
        let matched = create_matched(
            peer.next_seq(),
            &id.to_string(),
            color,
            &opponent,
            config.clock_secs,
            config.increment_secs,
        );
        let _ = peer.send(ClientOutbound::Matched(matched));
    }
    room.lock().start();
    spawn_clock(
        Arc::clone(&state.matches),
        id,
        room,
        Duration::from_millis(state.config.tick_ms),
    );
}

async fn on_action(
    state: &Arc<ServerState>,
    peer: &Arc<PeerHandle>,
    identity: &Identity,
    seq: u64,
    action: Action,
) {
    let Some((id, room)) = state.matches.find_player(identity.player).await else {
        let message = if state.is_queued(identity.player) {
            "Opponent not found yet"
        } else {
            "Not in a match"
        };
        reply_error(peer, seq, (ErrorCode::NotInMatch, message.into()));
        return;
    };

    let result = room.lock().act(identity.player, action);
    let finished = match result {
        Ok(Outcome::Accepted(effects)) => {
            let _ = peer.send(ClientOutbound::Ack(create_ack(seq)));
            effects.finished.is_some()
        }
        Ok(Outcome::Rejected(reason)) => {
            debug!(match_id = %id, reason = reason.as_str(), "action rejected");
            let _ = peer.send(ClientOutbound::Ack(create_rejection(seq, reason.as_str())));
            false
        }
        Err(e) => {
            reply_error(peer, seq, (ErrorCode::NotInMatch, e.to_string()));
            false
        }
    };

    if finished {
        room.lock().close();
        state.matches.remove(id).await;
    }
}

fn parse_tile(name: &str) -> Result<Tile, (ErrorCode, String)> {
    Tile::from_name(name.trim()).ok_or_else(|| (ErrorCode::InvalidTile, format!("Unknown tile: {name}")))
}

/// Scales outside `1..=MAX_SCALE` are refused before they reach a seat
fn check_scale(scale: u32) -> Result<u32, (ErrorCode, String)> {
    if (1..=MAX_SCALE).contains(&scale) {
        Ok(scale)
    } else {
        Err((
            ErrorCode::InvalidScale,
            format!("scale must be between 1 and {MAX_SCALE}"),
        ))
    }
}

fn reply_error(peer: &PeerHandle, seq: u64, (code, message): (ErrorCode, String)) {
    let _ = peer.send(ClientOutbound::Error(create_error(seq, code, &message)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiting(id: u64) -> (Waiting, mpsc::UnboundedReceiver<ClientOutbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let w = Waiting {
            player: PlayerId::new(),
            name: format!("p{id}"),
            scale: 80,
            peer: Arc::new(PeerHandle::new(id, tx)),
        };
        (w, rx)
    }

    #[test]
    fn default_config_binds_localhost() {
        let config = ServerConfig::default();
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:7878");
        assert_eq!(config.default_scale, DEFAULT_SCALE);
        let bad = ServerConfig {
            host: "not an address".to_string(),
            ..ServerConfig::default()
        };
        assert!(bad.socket_addr().is_err());
    }

    #[test]
    fn seek_pairs_fifo_and_resets_queue() {
        let state = ServerState::new(ServerConfig::default(), Collaborators::default());
        let (a, _ra) = waiting(1);
        let (b, _rb) = waiting(2);
        let (c, _rc) = waiting(3);
        let a_player = a.player;

        assert!(matches!(state.seek(a), SeekResult::Waiting));
        match state.seek(b) {
            SeekResult::Paired(white, black) => {
                assert_eq!(white.player, a_player);
                assert_eq!(black.peer.id(), 2);
            }
            _ => panic!("expected a pairing"),
        }
        assert!(matches!(state.seek(c), SeekResult::Waiting));
        assert_eq!(state.queue.lock().len(), 1);
    }

    #[test]
    fn duplicate_seek_and_cancel() {
        let state = ServerState::new(ServerConfig::default(), Collaborators::default());
        let (a, _ra) = waiting(1);
        let dup = Waiting {
            player: a.player,
            name: a.name.clone(),
            scale: 40,
            peer: Arc::clone(&a.peer),
        };
        let player = a.player;
        assert!(matches!(state.seek(a), SeekResult::Waiting));
        assert!(matches!(state.seek(dup), SeekResult::AlreadyQueued));
        assert!(state.is_queued(player));
        assert!(state.cancel_seek(1));
        assert!(!state.is_queued(player));
        assert!(!state.cancel_seek(1));
    }

    #[test]
    fn seq_must_increase() {
        let mut client = ClientSession {
            handshaken: true,
            last_seq: Some(3),
            identity: None,
            scale: 80,
        };
        assert!(!client.check_and_update_seq(3));
        assert!(client.check_and_update_seq(4));
        assert!(!client.check_and_update_seq(2));
    }

    #[test]
    fn tile_errors_are_typed() {
        assert_eq!(parse_tile(" 2e ").unwrap(), Tile::from_name("2e").unwrap());
        assert_eq!(parse_tile("e2").unwrap(), Tile::from_name("2e").unwrap());
        assert!(matches!(parse_tile("9z"), Err((ErrorCode::InvalidTile, _))));
        assert!(matches!(parse_tile("e9"), Err((ErrorCode::InvalidTile, _))));
    }

    #[test]
    fn scale_is_bounded() {
        assert_eq!(check_scale(1), Ok(1));
        assert_eq!(check_scale(MAX_SCALE), Ok(MAX_SCALE));
        assert!(matches!(check_scale(0), Err((ErrorCode::InvalidScale, _))));
        assert!(matches!(check_scale(MAX_SCALE + 1), Err((ErrorCode::InvalidScale, _))));
        assert!(matches!(check_scale(i32::MAX as u32), Err((ErrorCode::InvalidScale, _))));
    }
}
