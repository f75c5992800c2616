//! Persistence collaborator
//!
//! After every committed move, every promotion, and at the end of a match the
//! relay offers the store a [`SnapshotRecord`]. Store failures are logged by
//! the caller and never roll back in-memory match state.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::{EnPassant, MatchSnapshot, PieceCatalog, PieceRecord, StandardCatalog};
use crate::registry::MatchId;
use crate::types::{Color, GameOver, PieceKind, Tile};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is closed")]
    Closed,
    #[error("encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("unreadable record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceEntry {
    pub name: String,
    pub color: String,
    pub kind: String,
    pub tile: String,
    pub moved: bool,
}

/// Serializable piece-to-tile mapping plus what is needed to resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub match_id: MatchId,
    pub turn: String,
    pub pieces: Vec<PieceEntry>,
    pub white_secs: u32,
    pub black_secs: u32,
    pub since_capture: u16,
    pub captured_by_white: Vec<String>,
    pub captured_by_black: Vec<String>,
    pub moves: Vec<String>,
    /// Tile the side to move may capture onto en passant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub en_passant: Option<String>,
    /// Pawn waiting for the side to move to choose its promotion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_promotion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SnapshotRecord {
    pub fn new(match_id: MatchId, snapshot: &MatchSnapshot) -> Self {
        let kinds = |color: Color| -> Vec<String> {
            snapshot
                .captured_by(color)
                .iter()
                .map(|k| k.as_str().to_string())
                .collect()
        };
        Self {
            match_id,
            turn: snapshot.turn.as_str().to_string(),
            pieces: snapshot
                .pieces
                .iter()
                .map(|p| PieceEntry {
                    name: p.name.clone(),
                    color: p.color.as_str().to_string(),
                    kind: p.kind.as_str().to_string(),
                    tile: p.tile.name().to_string(),
                    moved: p.moved,
                })
                .collect(),
            white_secs: snapshot.clock(Color::White),
            black_secs: snapshot.clock(Color::Black),
            since_capture: snapshot.since_capture,
            captured_by_white: kinds(Color::White),
            captured_by_black: kinds(Color::Black),
            moves: snapshot.moves.clone(),
            en_passant: snapshot.en_passant.map(|ep| ep.target.name().to_string()),
            pending_promotion: snapshot.pending_promotion.map(|t| t.name().to_string()),
            result: None,
            reason: None,
        }
    }

    pub fn finished(mut self, over: GameOver) -> Self {
        self.result = Some(over.result.as_str().to_string());
        self.reason = Some(over.reason.as_str().to_string());
        self
    }

    /// Rebuild the core snapshot, e.g. to resume a match
    pub fn to_snapshot(&self) -> Result<MatchSnapshot, StoreError> {
        let catalog = StandardCatalog;
        let color = |s: &str| Color::from_str(s).ok_or_else(|| StoreError::Corrupt(s.to_string()));
        let kind = |s: &str| PieceKind::from_str(s).ok_or_else(|| StoreError::Corrupt(s.to_string()));
        let kinds = |names: &[String]| names.iter().map(|n| kind(n)).collect::<Result<Vec<_>, _>>();
        let tile = |s: &str| Tile::from_name(s).ok_or_else(|| StoreError::Corrupt(s.to_string()));
        let turn = color(&self.turn)?;

        let mut pieces = Vec::with_capacity(self.pieces.len());
        for entry in &self.pieces {
            let (c, k) = (color(&entry.color)?, kind(&entry.kind)?);
            pieces.push(PieceRecord {
                name: entry.name.clone(),
                color: c,
                kind: k,
                tile: tile(&entry.tile)?,
                moved: entry.moved,
                visual: catalog.visual(c, k),
            });
        }
        let en_passant = match self.en_passant.as_deref() {
            Some(name) => Some(
                EnPassant::for_target(tile(name)?, turn)
                    .ok_or_else(|| StoreError::Corrupt(name.to_string()))?,
            ),
            None => None,
        };
        Ok(MatchSnapshot {
            pieces,
            turn,
            clocks: [self.white_secs, self.black_secs],
            since_capture: self.since_capture,
            captured: [
                kinds(&self.captured_by_white[..])?,
                kinds(&self.captured_by_black[..])?,
            ],
            moves: self.moves.clone(),
            en_passant,
            pending_promotion: self.pending_promotion.as_deref().map(tile).transpose()?,
        })
    }
}

pub trait MatchStore: Send + Sync {
    fn save(&self, record: SnapshotRecord) -> Result<(), StoreError>;
}

/// Discards snapshots.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

impl MatchStore for NullStore {
    fn save(&self, _record: SnapshotRecord) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Keeps every snapshot per match in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<MatchId, Vec<SnapshotRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self, id: MatchId) -> Vec<SnapshotRecord> {
        self.records.lock().get(&id).cloned().unwrap_or_default()
    }

    pub fn latest(&self, id: MatchId) -> Option<SnapshotRecord> {
        self.records.lock().get(&id).and_then(|r| r.last().cloned())
    }
}

impl MatchStore for MemoryStore {
    fn save(&self, record: SnapshotRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .entry(record.match_id)
            .or_default()
            .push(record);
        Ok(())
    }
}

/// Appends one JSON line per snapshot from a background task.
#[derive(Debug, Clone)]
pub struct JsonlStore {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl JsonlStore {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn spawn(path: String) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::spawn(async move {
            use tokio::fs::OpenOptions;
            use tokio::io::AsyncWriteExt;

            let mut file = match OpenOptions::new().create(true).append(true).open(&path).await {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(%path, error = %e, "match store unavailable");
                    return;
                }
            };
            while let Some(mut line) = rx.recv().await {
                line.push(b'\n');
                if let Err(e) = file.write_all(&line).await {
                    tracing::warn!(%path, error = %e, "match store write failed");
                    break;
                }
            }
            let _ = file.flush().await;
        });
        Self { tx }
    }
}

impl MatchStore for JsonlStore {
    fn save(&self, record: SnapshotRecord) -> Result<(), StoreError> {
        let line = serde_json::to_vec(&record)?;
        self.tx.send(line).map_err(|_| StoreError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Action, Actor, Match, NullSink};
    use crate::types::{EndReason, MatchConfig};

    fn played() -> Match {
        let mut game = Match::new(MatchConfig::default());
        let mut sink = NullSink;
        for (from, to) in [("2e", "4e"), ("7d", "5d"), ("4e", "5d")] {
            game.apply(Actor::Local, Action::Select(Tile::from_name(from).unwrap()), &mut sink);
            game.apply(Actor::Local, Action::MoveTo(Tile::from_name(to).unwrap()), &mut sink);
        }
        game
    }

    #[test]
    fn record_resumes_to_same_position() {
        let game = played();
        let id = MatchId::new();
        let record = SnapshotRecord::new(id, &game.snapshot());
        assert_eq!(record.captured_by_white, vec!["pawn".to_string()]);

        let json = serde_json::to_string(&record).unwrap();
        let back: SnapshotRecord = serde_json::from_str(&json).unwrap();
        let resumed = Match::resume(&back.to_snapshot().unwrap(), MatchConfig::default()).unwrap();
        assert_eq!(resumed.snapshot(), game.snapshot());
    }

    #[test]
    fn record_keeps_en_passant_window() {
        let mut game = Match::new(MatchConfig::default());
        let mut sink = NullSink;
        for (from, to) in [("2e", "4e"), ("7a", "6a"), ("4e", "5e"), ("7d", "5d")] {
            game.apply(Actor::Local, Action::Select(Tile::from_name(from).unwrap()), &mut sink);
            game.apply(Actor::Local, Action::MoveTo(Tile::from_name(to).unwrap()), &mut sink);
        }
        let record = SnapshotRecord::new(MatchId::new(), &game.snapshot());
        assert_eq!(record.en_passant.as_deref(), Some("6d"));

        let json = serde_json::to_string(&record).unwrap();
        let back: SnapshotRecord = serde_json::from_str(&json).unwrap();
        let resumed = Match::resume(&back.to_snapshot().unwrap(), MatchConfig::default()).unwrap();
        assert_eq!(resumed.en_passant(), game.en_passant());
    }

    #[test]
    fn older_records_without_rights_still_load() {
        let mut value = serde_json::to_value(SnapshotRecord::new(MatchId::new(), &played().snapshot())).unwrap();
        let fields = value.as_object_mut().unwrap();
        fields.remove("en_passant");
        fields.remove("pending_promotion");
        let record: SnapshotRecord = serde_json::from_value(value).unwrap();
        let snapshot = record.to_snapshot().unwrap();
        assert_eq!(snapshot.en_passant, None);
        assert_eq!(snapshot.pending_promotion, None);
    }

    #[test]
    fn corrupt_record_is_reported() {
        let mut record = SnapshotRecord::new(MatchId::new(), &played().snapshot());
        record.pieces[0].tile = "9z".to_string();
        assert!(matches!(record.to_snapshot(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn memory_store_keeps_history() {
        let store = MemoryStore::new();
        let id = MatchId::new();
        let snapshot = played().snapshot();
        store.save(SnapshotRecord::new(id, &snapshot)).unwrap();
        store
            .save(SnapshotRecord::new(id, &snapshot).finished(GameOver::draw(EndReason::Stalemate)))
            .unwrap();
        assert_eq!(store.history(id).len(), 2);
        assert_eq!(store.latest(id).unwrap().reason.as_deref(), Some("stalemate"));
        assert!(store.history(MatchId::new()).is_empty());
    }

    #[tokio::test]
    async fn jsonl_store_reports_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let store = JsonlStore { tx };
        let record = SnapshotRecord::new(MatchId::new(), &played().snapshot());
        assert!(matches!(store.save(record), Err(StoreError::Closed)));
    }
}
