//! Identifiers and the map of running matches
//!
//! The repository is the only shared structure that spans matches. Each entry
//! is an `Arc<Mutex<MatchRoom>>`; the per-match mutex is the critical section
//! for every read-validate-mutate-respond sequence on that match.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::relay::MatchRoom;

/// Unique identifier for a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchId(Uuid);

impl MatchId {
    /// Create a new random match ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MatchId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique identifier for a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(Uuid);

impl PlayerId {
    /// Create a new random player ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PlayerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

pub type SharedRoom = Arc<Mutex<MatchRoom>>;

/// Running matches, plus which match each seated player belongs to
#[derive(Default)]
pub struct MatchRepository {
    matches: RwLock<HashMap<MatchId, SharedRoom>>,
    by_player: RwLock<HashMap<PlayerId, MatchId>>,
}

impl MatchRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a room under its id and index both seated players
    pub async fn insert(&self, room: MatchRoom) -> SharedRoom {
        let id = room.id();
        let players = room.session().players();
        let shared = Arc::new(Mutex::new(room));
        self.matches.write().await.insert(id, Arc::clone(&shared));
        let mut by_player = self.by_player.write().await;
        for player in players {
            by_player.insert(player, id);
        }
        shared
    }

    pub async fn get(&self, id: MatchId) -> Option<SharedRoom> {
        self.matches.read().await.get(&id).cloned()
    }

    /// The match `player` is seated in, if it is still registered
    pub async fn find_player(&self, player: PlayerId) -> Option<(MatchId, SharedRoom)> {
        let id = *self.by_player.read().await.get(&player)?;
        self.get(id).await.map(|room| (id, room))
    }

    /// Drop a match and its player index entries
    pub async fn remove(&self, id: MatchId) -> Option<SharedRoom> {
        let removed = self.matches.write().await.remove(&id);
        self.by_player.write().await.retain(|_, m| *m != id);
        removed
    }

    pub async fn len(&self) -> usize {
        self.matches.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.matches.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_strings() {
        let id = MatchId::new();
        let parsed: MatchId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<PlayerId>().is_err());
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(PlayerId::new(), PlayerId::new());
        assert_ne!(MatchId::new(), MatchId::new());
    }
}
