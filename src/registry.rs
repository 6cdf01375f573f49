//! The room registry.
//!
//! Holds every live room, keyed by code, and owns the on-disk persistence
//! snapshot. The registry lock is only ever held for the
//! HashMap lookup/insert itself — never across a `Room` operation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::ROOM_CODE_RETRY_BUDGET;
use crate::error::RelayError;
use crate::ids::{generate_room_code, now_ms};
use crate::protocol::RoomSummary;
use crate::room::Room;

pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    persistence_path: String,
}

impl RoomRegistry {
    pub fn new(persistence_path: impl Into<String>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            persistence_path: persistence_path.into(),
        }
    }

    /// Creates a room under a freshly generated unique code, retrying
    /// collisions up to [`ROOM_CODE_RETRY_BUDGET`] times.
    pub async fn create_room(
        &self,
        created_by: String,
        password: Option<String>,
        is_public: bool,
        expires_in_hours: u32,
    ) -> Result<Arc<Room>, RelayError> {
        let mut rooms = self.rooms.write().await;
        for _ in 0..ROOM_CODE_RETRY_BUDGET {
            let code = generate_room_code();
            if rooms.contains_key(&code) {
                continue;
            }
            let room = Room::new(code.clone(), created_by, password, is_public, expires_in_hours);
            rooms.insert(code, Arc::clone(&room));
            return Ok(room);
        }
        Err(RelayError::CodeSpaceExhausted)
    }

    pub async fn get_room(&self, code: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(code).cloned()
    }

    pub async fn has_room(&self, code: &str) -> bool {
        self.rooms.read().await.contains_key(code)
    }

    pub async fn delete_room(&self, code: &str) -> Option<Arc<Room>> {
        self.rooms.write().await.remove(code)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn all_room_codes(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }

    /// Summaries of non-empty public rooms, for `list_rooms`.
    pub async fn public_rooms(&self) -> Vec<RoomSummary> {
        let rooms = self.rooms.read().await;
        let mut summaries = Vec::new();
        for room in rooms.values() {
            if room.is_empty().await {
                continue;
            }
            let summary = room.to_room_summary().await;
            if summary.is_public {
                summaries.push(summary);
            }
        }
        summaries
    }

    /// Removes every room with zero members, returning the codes dropped.
    pub async fn prune_empty_rooms(&self) -> Vec<String> {
        let mut dropped = Vec::new();
        let codes: Vec<String> = self.rooms.read().await.keys().cloned().collect();
        for code in codes {
            let is_empty = match self.rooms.read().await.get(&code) {
                Some(room) => room.is_empty().await,
                None => continue,
            };
            if is_empty {
                self.rooms.write().await.remove(&code);
                dropped.push(code);
            }
        }
        dropped
    }

    /// Removes every room past its `expires_in_hours` horizon, returning
    /// the codes dropped.
    pub async fn prune_expired_rooms(&self) -> Vec<String> {
        let mut dropped = Vec::new();
        let codes: Vec<String> = self.rooms.read().await.keys().cloned().collect();
        for code in codes {
            let is_expired = match self.rooms.read().await.get(&code) {
                Some(room) => room.is_expired().await,
                None => continue,
            };
            if is_expired {
                self.rooms.write().await.remove(&code);
                dropped.push(code);
            }
        }
        dropped
    }

    /// Writes every non-empty room's summary (password replaced by its
    /// SHA-256 hex digest) to the persistence path, via
    /// write-temp-then-rename so a crash mid-write never corrupts the
    /// existing snapshot.
    pub async fn persist(&self) -> std::io::Result<()> {
        let rooms = self.rooms.read().await;
        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms.values() {
            if room.is_empty().await {
                continue;
            }
            summaries.push(room.to_room_summary().await);
        }
        drop(rooms);

        let body = serde_json::to_vec_pretty(&summaries)?;
        let tmp_path = format!("{}.tmp", self.persistence_path);
        tokio::fs::write(&tmp_path, body).await?;
        tokio::fs::rename(&tmp_path, &self.persistence_path).await?;
        println!(
            "💾 persisted {} room(s) to {}",
            summaries.len(),
            self.persistence_path
        );
        Ok(())
    }

    /// Loads room metadata from the persistence path, if present.
    /// Membership is never recovered — a recovered room starts empty and
    /// is subject to the same empty-room pruning as any other.
    pub async fn load(&self) -> std::io::Result<usize> {
        let body = match tokio::fs::read(&self.persistence_path).await {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };
        let summaries: Vec<RoomSummary> = match serde_json::from_slice(&body) {
            Ok(summaries) => summaries,
            Err(err) => {
                eprintln!(
                    "⚠️  ignoring unreadable persistence file {}: {err}",
                    self.persistence_path
                );
                return Ok(0);
            }
        };

        let now = now_ms();
        let mut rooms = self.rooms.write().await;
        let mut recovered = 0;
        for summary in summaries {
            if summary.expires_in_hours > 0
                && now - summary.last_activity > summary.expires_in_hours as i64 * 3_600_000
            {
                continue;
            }
            rooms.insert(summary.code.clone(), Room::from_summary(&summary));
            recovered += 1;
        }
        Ok(recovered)
    }
}
