//! Online relay - delivers match deltas to two independently scaled peers
//!
//! A [`MatchRoom`] pairs a core [`Match`] with its [`OnlineSession`] and is
//! always accessed under its per-match mutex. Deltas are rendered per
//! recipient at that recipient's scale. A failed write to one peer never stops
//! delivery to the other; the peer is marked disconnected and, unless it
//! rejoins within the grace period, forfeits.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arrayvec::ArrayVec;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::{Action, Actor, Audience, DeliverySink, Delta, Match, Outcome};
use crate::protocol::*;
use crate::registry::{MatchId, MatchRepository, PlayerId, SharedRoom};
use crate::store::{MatchStore, SnapshotRecord};
use crate::types::{Color, EndReason, GameOver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("peer connection is gone")]
    PeerGone,
    #[error("player is not seated in this match")]
    NotSeated,
}

/// Everything the per-connection writer task can be asked to send
#[derive(Debug, Clone)]
pub enum ClientOutbound {
    Welcome(WelcomeMessage),
    Waiting(WaitingMessage),
    Matched(MatchedMessage),
    Delta(DeltaMessage),
    Ack(AckMessage),
    Error(ErrorMessage),
    /// Flush and stop writing
    Close,
}

impl ClientOutbound {
    /// Serialize into `buf`. Returns false for [`ClientOutbound::Close`].
    pub fn encode(&self, buf: &mut Vec<u8>) -> serde_json::Result<bool> {
        buf.clear();
        match self {
            ClientOutbound::Welcome(m) => serde_json::to_writer(&mut *buf, m)?,
            ClientOutbound::Waiting(m) => serde_json::to_writer(&mut *buf, m)?,
            ClientOutbound::Matched(m) => serde_json::to_writer(&mut *buf, m)?,
            ClientOutbound::Delta(m) => serde_json::to_writer(&mut *buf, m)?,
            ClientOutbound::Ack(m) => serde_json::to_writer(&mut *buf, m)?,
            ClientOutbound::Error(m) => serde_json::to_writer(&mut *buf, m)?,
            ClientOutbound::Close => return Ok(false),
        }
        Ok(true)
    }
}

/// Sending half of one client connection
#[derive(Debug)]
pub struct PeerHandle {
    id: u64,
    tx: mpsc::UnboundedSender<ClientOutbound>,
    seq: AtomicU64,
    shutdown: Notify,
}

impl PeerHandle {
    pub fn new(id: u64, tx: mpsc::UnboundedSender<ClientOutbound>) -> Self {
        Self {
            id,
            tx,
            seq: AtomicU64::new(0),
            shutdown: Notify::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sequence number for the next server-originated message
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn send(&self, msg: ClientOutbound) -> Result<(), RelayError> {
        self.tx.send(msg).map_err(|_| RelayError::PeerGone)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Ask the connection to finish writing and stop reading
    pub fn close(&self) {
        let _ = self.tx.send(ClientOutbound::Close);
        self.shutdown.notify_one();
    }

    /// Resolves once [`PeerHandle::close`] was called
    pub async fn closed(&self) {
        self.shutdown.notified().await
    }
}

/// One side of an online match
#[derive(Debug)]
pub struct Seat {
    player: PlayerId,
    name: String,
    scale: u32,
    peer: Option<Arc<PeerHandle>>,
    dropped_at: Option<Instant>,
}

impl Seat {
    pub fn new(player: PlayerId, name: impl Into<String>, scale: u32, peer: Arc<PeerHandle>) -> Self {
        Self {
            player,
            name: name.into(),
            scale,
            peer: Some(peer),
            dropped_at: None,
        }
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn is_connected(&self) -> bool {
        self.peer.is_some()
    }

    pub fn peer(&self) -> Option<&Arc<PeerHandle>> {
        self.peer.as_ref()
    }
}

/// The two connected players of a match, indexed by color
#[derive(Debug)]
pub struct OnlineSession {
    match_id: MatchId,
    seats: [Seat; 2],
}

impl OnlineSession {
    pub fn new(match_id: MatchId, white: Seat, black: Seat) -> Self {
        Self {
            match_id,
            seats: [white, black],
        }
    }

    pub fn seat(&self, color: Color) -> &Seat {
        &self.seats[color.index()]
    }

    pub fn players(&self) -> [PlayerId; 2] {
        [self.seats[0].player, self.seats[1].player]
    }

    pub fn color_of(&self, player: PlayerId) -> Option<Color> {
        Color::ALL
            .into_iter()
            .find(|c| self.seats[c.index()].player == player)
    }

    /// Collects deltas for this session; `actor` receives actor-only deltas
    pub fn sink(&mut self, actor: Option<Color>) -> SessionSink<'_> {
        SessionSink {
            session: self,
            actor,
            dropped: ArrayVec::new(),
        }
    }

    /// Send one body to `to` at its own scale. A failed write marks the seat
    /// disconnected and returns false; an already-empty seat is skipped.
    fn deliver(&mut self, to: Color, body: impl FnOnce(u32) -> DeltaBody) -> bool {
        let match_id = self.match_id;
        let seat = &mut self.seats[to.index()];
        let Some(peer) = seat.peer.as_ref() else {
            return true;
        };
        let msg = create_delta(peer.next_seq(), &match_id.to_string(), body(seat.scale));
        let event = msg.body.event();
        match peer.send(ClientOutbound::Delta(msg)) {
            Ok(()) => true,
            Err(e) => {
                warn!(%match_id, color = %to, event, error = %e, "delta delivery failed");
                seat.peer = None;
                seat.dropped_at = Some(Instant::now());
                false
            }
        }
    }

    fn attach(&mut self, color: Color, peer: Arc<PeerHandle>, scale: Option<u32>) {
        let seat = &mut self.seats[color.index()];
        if let Some(old) = seat.peer.replace(peer) {
            old.close();
        }
        if let Some(scale) = scale {
            seat.scale = scale;
        }
        seat.dropped_at = None;
    }

    /// Detach `color` if `peer_id` is still the connection bound to it
    fn detach(&mut self, color: Color, peer_id: u64) -> bool {
        let seat = &mut self.seats[color.index()];
        if seat.peer.as_ref().map(|p| p.id()) != Some(peer_id) {
            return false;
        }
        seat.peer = None;
        seat.dropped_at = Some(Instant::now());
        true
    }

    /// Seat whose grace period ran out first
    fn expired(&self, now: Instant, grace: Duration) -> Option<Color> {
        Color::ALL
            .into_iter()
            .filter_map(|c| self.seats[c.index()].dropped_at.map(|t| (c, t)))
            .filter(|(_, t)| now.saturating_duration_since(*t) >= grace)
            .min_by_key(|(_, t)| *t)
            .map(|(c, _)| c)
    }

    fn close_all(&mut self) {
        for seat in self.seats.iter_mut() {
            if let Some(peer) = seat.peer.take() {
                peer.close();
            }
        }
    }
}

/// [`DeliverySink`] that fans deltas out to the session's seats
pub struct SessionSink<'a> {
    session: &'a mut OnlineSession,
    actor: Option<Color>,
    dropped: ArrayVec<Color, 2>,
}

impl SessionSink<'_> {
    /// Seats whose connection failed during this batch
    pub fn dropped(&self) -> &[Color] {
        &self.dropped
    }

    fn into_dropped(self) -> ArrayVec<Color, 2> {
        self.dropped
    }
}

impl DeliverySink for SessionSink<'_> {
    fn emit(&mut self, audience: Audience, delta: Delta) {
        let recipients: ArrayVec<Color, 2> = match (audience, self.actor) {
            (Audience::Actor, Some(actor)) => [actor].into_iter().collect(),
            (Audience::Actor, None) => ArrayVec::new(),
            (Audience::Everyone, _) => Color::ALL.into_iter().collect(),
        };
        for color in recipients {
            let delivered = self
                .session
                .deliver(color, |scale| DeltaBody::from_delta(&delta, scale));
            if !delivered && !self.dropped.contains(&color) {
                self.dropped.push(color);
            }
        }
    }
}

/// A running online match: rules, seats, and the persistence collaborator
pub struct MatchRoom {
    id: MatchId,
    game: Match,
    session: OnlineSession,
    store: Arc<dyn MatchStore>,
    grace: Duration,
    pending_ms: u64,
}

impl MatchRoom {
    pub fn new(
        game: Match,
        session: OnlineSession,
        store: Arc<dyn MatchStore>,
        grace: Duration,
    ) -> Self {
        Self {
            id: session.match_id,
            game,
            session,
            store,
            grace,
            pending_ms: 0,
        }
    }

    pub fn id(&self) -> MatchId {
        self.id
    }

    pub fn game(&self) -> &Match {
        &self.game
    }

    pub fn session(&self) -> &OnlineSession {
        &self.session
    }

    pub fn is_over(&self) -> bool {
        self.game.is_over()
    }

    /// Send the opening position to both players
    pub fn start(&mut self) {
        let mut sink = self.session.sink(None);
        self.game.resync(Audience::Everyone, &mut sink);
        let dropped = sink.into_dropped();
        self.announce_drops(&dropped);
    }

    /// Apply one action from a seated player. A finishing action leaves the
    /// connections open so the caller can acknowledge it before [`MatchRoom::close`].
    pub fn act(&mut self, player: PlayerId, action: Action) -> Result<Outcome, RelayError> {
        let color = self.session.color_of(player).ok_or(RelayError::NotSeated)?;
        let mut sink = self.session.sink(Some(color));
        let outcome = self.game.apply(Actor::Seat(color), action, &mut sink);
        let dropped = sink.into_dropped();

        if let Some(effects) = outcome.effects() {
            if effects.committed || effects.promoted {
                self.persist(None);
            }
            if let Some(over) = effects.finished {
                self.finish(over);
                return Ok(outcome);
            }
        }
        self.announce_drops(&dropped);
        Ok(outcome)
    }

    /// Advance the clock and enforce reconnect grace. Returns true once the
    /// match has ended, after closing both connections.
    pub fn tick(&mut self, elapsed: Duration, now: Instant) -> bool {
        let ended = self.advance(elapsed, now);
        if ended {
            self.close();
        }
        ended
    }

    fn advance(&mut self, elapsed: Duration, now: Instant) -> bool {
        if self.game.is_over() {
            return true;
        }
        self.pending_ms += elapsed.as_millis() as u64;
        let secs = self.pending_ms / 1000;
        if secs > 0 {
            self.pending_ms -= secs * 1000;
            let mut sink = self.session.sink(None);
            let flagged = self.game.tick(secs as u32, &mut sink);
            let dropped = sink.into_dropped();
            if let Some(over) = flagged {
                self.finish(over);
                return true;
            }
            self.announce_drops(&dropped);
        }
        if let Some(loser) = self.session.expired(now, self.grace) {
            info!(match_id = %self.id, color = %loser, "reconnect grace expired");
            self.forfeit(loser, EndReason::Disconnect);
            return true;
        }
        false
    }

    /// End the match against `loser`
    pub fn forfeit(&mut self, loser: Color, reason: EndReason) -> Option<GameOver> {
        let mut sink = self.session.sink(None);
        let over = self.game.forfeit(loser, reason, &mut sink)?;
        drop(sink);
        self.finish(over);
        Some(over)
    }

    /// The connection `peer_id` of `player` went away
    pub fn disconnect(&mut self, player: PlayerId, peer_id: u64) {
        let Some(color) = self.session.color_of(player) else {
            return;
        };
        if self.game.is_over() || !self.session.detach(color, peer_id) {
            return;
        }
        info!(match_id = %self.id, %color, "player disconnected");
        self.announce_drops(&[color]);
    }

    /// Reattach a returning player and resync their view
    pub fn rejoin(
        &mut self,
        player: PlayerId,
        peer: Arc<PeerHandle>,
        scale: Option<u32>,
    ) -> Result<Color, RelayError> {
        let color = self.session.color_of(player).ok_or(RelayError::NotSeated)?;
        self.session.attach(color, peer, scale);
        info!(match_id = %self.id, %color, "player rejoined");
        self.resync(color);
        self.session.deliver(color.opposite(), |_| DeltaBody::Opponent {
            connected: true,
            grace_secs: None,
        });
        Ok(color)
    }

    /// Change a player's scale and resend the position at the new scale
    pub fn rescale(&mut self, player: PlayerId, scale: u32) -> Result<(), RelayError> {
        let color = self.session.color_of(player).ok_or(RelayError::NotSeated)?;
        self.session.seats[color.index()].scale = scale;
        self.resync(color);
        Ok(())
    }

    fn resync(&mut self, color: Color) {
        let mut sink = self.session.sink(Some(color));
        self.game.resync(Audience::Actor, &mut sink);
    }

    /// Tell the opponents of freshly dropped seats
    fn announce_drops(&mut self, dropped: &[Color]) {
        let grace = self.grace.as_secs() as u32;
        for &color in dropped {
            self.session.deliver(color.opposite(), |_| DeltaBody::Opponent {
                connected: false,
                grace_secs: Some(grace),
            });
        }
    }

    fn persist(&self, over: Option<GameOver>) {
        let mut record = SnapshotRecord::new(self.id, &self.game.snapshot());
        if let Some(over) = over {
            record = record.finished(over);
        }
        if let Err(e) = self.store.save(record) {
            warn!(match_id = %self.id, error = %e, "snapshot not persisted");
        }
    }

    fn finish(&mut self, over: GameOver) {
        info!(
            match_id = %self.id,
            result = over.result.as_str(),
            reason = over.reason.as_str(),
            "match over"
        );
        self.persist(Some(over));
    }

    /// Close both connections
    pub fn close(&mut self) {
        self.session.close_all();
    }
}

/// Drive a match clock until the match ends, then drop it from the repository
pub fn spawn_clock(
    repo: Arc<MatchRepository>,
    id: MatchId,
    room: SharedRoom,
    tick: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        let mut last = Instant::now();
        loop {
            interval.tick().await;
            let now = Instant::now();
            let ended = room.lock().tick(now - last, now);
            last = now;
            if ended {
                repo.remove(id).await;
                debug!(match_id = %id, "match removed");
                break;
            }
        }
    })
}

/// Delivers every delta to a single local caller as JSON lines
pub struct LocalSink<W: Write> {
    out: W,
    scale: u32,
    seq: u64,
    failures: usize,
}

impl<W: Write> LocalSink<W> {
    pub fn new(out: W, scale: u32) -> Self {
        Self {
            out,
            scale,
            seq: 0,
            failures: 0,
        }
    }

    /// Writes that failed so far
    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> DeliverySink for LocalSink<W> {
    fn emit(&mut self, _audience: Audience, delta: Delta) {
        self.seq += 1;
        let msg = create_delta(self.seq, "local", DeltaBody::from_delta(&delta, self.scale));
        let written = serde_json::to_writer(&mut self.out, &msg)
            .map_err(std::io::Error::from)
            .and_then(|()| self.out.write_all(b"\n"));
        if let Err(e) = written {
            self.failures += 1;
            debug!(error = %e, event = delta.event(), "local delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{MatchConfig, Tile};

    struct Peer {
        handle: Arc<PeerHandle>,
        rx: mpsc::UnboundedReceiver<ClientOutbound>,
    }

    fn peer(id: u64) -> Peer {
        let (tx, rx) = mpsc::unbounded_channel();
        Peer {
            handle: Arc::new(PeerHandle::new(id, tx)),
            rx,
        }
    }

    fn deltas(rx: &mut mpsc::UnboundedReceiver<ClientOutbound>) -> Vec<DeltaBody> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let ClientOutbound::Delta(d) = msg {
                out.push(d.body);
            }
        }
        out
    }

    fn room(white: &Peer, black: &Peer, store: Arc<dyn MatchStore>) -> (MatchRoom, PlayerId, PlayerId) {
        let (w, b) = (PlayerId::new(), PlayerId::new());
        let session = OnlineSession::new(
            MatchId::new(),
            Seat::new(w, "alice", 10, Arc::clone(&white.handle)),
            Seat::new(b, "bob", 80, Arc::clone(&black.handle)),
        );
        let room = MatchRoom::new(
            Match::new(MatchConfig::default()),
            session,
            store,
            Duration::from_secs(30),
        );
        (room, w, b)
    }

    fn tile(name: &str) -> Tile {
        Tile::from_name(name).unwrap()
    }

    #[test]
    fn each_peer_gets_its_own_scale() {
        let (mut a, mut b) = (peer(1), peer(2));
        let (mut room, white, _) = room(&a, &b, Arc::new(MemoryStore::new()));
        room.act(white, Action::Select(tile("2e"))).unwrap();
        room.act(white, Action::MoveTo(tile("4e"))).unwrap();

        let moved = |bodies: Vec<DeltaBody>| {
            bodies.into_iter().find_map(|b| match b {
                DeltaBody::Moved { to, .. } => Some((to.top, to.left)),
                _ => None,
            })
        };
        assert_eq!(moved(deltas(&mut a.rx)), Some((40, 40)));
        assert_eq!(moved(deltas(&mut b.rx)), Some((320, 320)));
    }

    #[test]
    fn selection_stays_with_actor() {
        let (mut a, mut b) = (peer(1), peer(2));
        let (mut room, white, _) = room(&a, &b, Arc::new(MemoryStore::new()));
        room.act(white, Action::Select(tile("1g"))).unwrap();
        assert!(matches!(deltas(&mut a.rx).as_slice(), [DeltaBody::Selected { .. }]));
        assert!(deltas(&mut b.rx).is_empty());
    }

    #[test]
    fn stranger_is_not_seated() {
        let (a, b) = (peer(1), peer(2));
        let (mut room, _, _) = room(&a, &b, Arc::new(MemoryStore::new()));
        assert_eq!(
            room.act(PlayerId::new(), Action::Resign),
            Err(RelayError::NotSeated)
        );
    }

    #[test]
    fn committed_moves_are_persisted() {
        let (a, b) = (peer(1), peer(2));
        let store = Arc::new(MemoryStore::new());
        let (mut room, white, _) = room(&a, &b, store.clone());
        room.act(white, Action::Select(tile("2d"))).unwrap();
        assert!(store.history(room.id()).is_empty());
        room.act(white, Action::MoveTo(tile("4d"))).unwrap();
        let saved = store.latest(room.id()).unwrap();
        assert_eq!(saved.moves, vec!["2d-4d".to_string()]);
    }

    #[test]
    fn failed_write_does_not_block_the_other_peer() {
        let (a, b) = (peer(1), peer(2));
        let (mut room, white, _) = room(&a, &b, Arc::new(MemoryStore::new()));
        let Peer { rx: mut black_rx, .. } = b;
        drop(a);

        room.act(white, Action::Select(tile("2e"))).unwrap();
        room.act(white, Action::MoveTo(tile("4e"))).unwrap();
        assert!(!room.session().seat(Color::White).is_connected());

        let bodies = deltas(&mut black_rx);
        assert!(bodies.iter().any(|b| matches!(b, DeltaBody::Moved { .. })));
        assert!(bodies
            .iter()
            .any(|b| matches!(b, DeltaBody::Opponent { connected: false, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn grace_expiry_forfeits_dropped_player() {
        let (a, mut b) = (peer(1), peer(2));
        let (mut room, white, _) = room(&a, &b, Arc::new(MemoryStore::new()));
        room.disconnect(white, 1);
        assert!(!room.session().seat(Color::White).is_connected());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!room.tick(Duration::from_secs(10), Instant::now()));
        tokio::time::advance(Duration::from_secs(25)).await;
        assert!(room.tick(Duration::from_secs(25), Instant::now()));

        assert_eq!(
            room.game().game_over(),
            Some(GameOver::loss(Color::White, EndReason::Disconnect))
        );
        assert!(deltas(&mut b.rx)
            .iter()
            .any(|d| matches!(d, DeltaBody::GameOver { reason, .. } if reason == "disconnect")));
    }

    #[tokio::test(start_paused = true)]
    async fn rejoin_cancels_grace_and_resyncs() {
        let (a, b) = (peer(1), peer(2));
        let (mut room, white, _) = room(&a, &b, Arc::new(MemoryStore::new()));
        room.disconnect(white, 1);

        let mut again = peer(3);
        assert_eq!(
            room.rejoin(white, Arc::clone(&again.handle), Some(20)),
            Ok(Color::White)
        );
        let bodies = deltas(&mut again.rx);
        assert!(matches!(bodies.first(), Some(DeltaBody::Position { .. })));

        tokio::time::advance(Duration::from_secs(60)).await;
        let ended = room.tick(Duration::ZERO, Instant::now());
        assert!(!ended);
        assert_eq!(room.session().seat(Color::White).scale(), 20);
    }

    #[test]
    fn stale_connection_cannot_detach_new_one() {
        let (a, b) = (peer(1), peer(2));
        let (mut room, white, _) = room(&a, &b, Arc::new(MemoryStore::new()));
        let again = peer(3);
        room.rejoin(white, Arc::clone(&again.handle), None).unwrap();
        room.disconnect(white, 1);
        assert!(room.session().seat(Color::White).is_connected());
    }

    #[test]
    fn clock_flag_ends_match_and_closes_peers() {
        let (a, mut b) = (peer(1), peer(2));
        let (w, bl) = (PlayerId::new(), PlayerId::new());
        let session = OnlineSession::new(
            MatchId::new(),
            Seat::new(w, "alice", 80, Arc::clone(&a.handle)),
            Seat::new(bl, "bob", 80, Arc::clone(&b.handle)),
        );
        let config = MatchConfig {
            clock_secs: 2,
            ..MatchConfig::default()
        };
        let mut room = MatchRoom::new(
            Match::new(config),
            session,
            Arc::new(MemoryStore::new()),
            Duration::from_secs(30),
        );
        let now = Instant::now();
        assert!(!room.tick(Duration::from_millis(1500), now));
        assert!(room.tick(Duration::from_millis(500), now));
        assert!(!room.session().seat(Color::Black).is_connected());

        let mut saw_close = false;
        while let Ok(msg) = b.rx.try_recv() {
            saw_close |= matches!(msg, ClientOutbound::Close);
        }
        assert!(saw_close);
        assert_eq!(
            room.act(w, Action::Select(tile("2e"))).unwrap(),
            Outcome::Rejected(crate::core::Rejection::MatchOver)
        );
    }

    #[test]
    fn local_sink_writes_json_lines() {
        let mut game = Match::new(MatchConfig::default());
        let mut sink = LocalSink::new(Vec::new(), 80);
        game.apply(Actor::Local, Action::Select(tile("2e")), &mut sink);
        game.apply(Actor::Local, Action::MoveTo(tile("4e")), &mut sink);
        assert_eq!(sink.failures(), 0);
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let events: Vec<String> = text
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["event"].to_string())
            .collect();
        assert_eq!(events.first().map(String::as_str), Some("\"selected\""));
        assert!(events.iter().any(|e| e == "\"moved\""));
        assert!(events.iter().any(|e| e == "\"clock\""));
    }
}
