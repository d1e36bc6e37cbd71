//! In-memory room store

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::{validate_new_room, RoomStore, Subscription, CHANGE_BUFFER};
use crate::error::{Error, Result};
use crate::invariants::assert_room_invariants;
use crate::models::{RoomRecord, RoomUpdate, UpdateOutcome};

/// Room store held in process memory. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryRoomStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    rooms: RwLock<HashMap<String, RoomRecord>>,
    changes: broadcast::Sender<RoomRecord>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            inner: Arc::new(MemoryInner {
                rooms: RwLock::new(HashMap::new()),
                changes,
            }),
        }
    }
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomStore for MemoryRoomStore {
    async fn create_room(&self, room: RoomRecord) -> Result<RoomRecord> {
        validate_new_room(&room)?;

        let mut rooms = self.inner.rooms.write().await;
        if rooms.contains_key(&room.id) {
            return Err(Error::InvalidOperation(format!(
                "Room '{}' already exists",
                room.id
            )));
        }
        rooms.insert(room.id.clone(), room.clone());
        Ok(room)
    }

    async fn get_room(&self, room_id: &str) -> Result<Option<RoomRecord>> {
        Ok(self.inner.rooms.read().await.get(room_id).cloned())
    }

    async fn update_room(&self, room_id: &str, update: RoomUpdate) -> Result<UpdateOutcome> {
        let mut rooms = self.inner.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| Error::NotFound(format!("Room '{}'", room_id)))?;
        let outcome = room.apply(&update, Utc::now());
        assert_room_invariants(room);

        // Published under the lock so the feed order matches the apply order
        if outcome == UpdateOutcome::Applied && self.inner.changes.send(room.clone()).is_err() {
            debug!(room_id = %room_id, "No change subscribers");
        }

        Ok(outcome)
    }

    async fn subscribe_changes(&self, room_id: &str) -> Result<Subscription> {
        Ok(Subscription::from_broadcast(
            room_id,
            self.inner.changes.subscribe(),
        ))
    }

    async fn list_rooms(&self) -> Result<Vec<RoomRecord>> {
        let mut rooms: Vec<_> = self.inner.rooms.read().await.values().cloned().collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rooms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RoomStatus;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryRoomStore::new();
        store.create_room(RoomRecord::new("lobby", 2)).await.unwrap();

        let room = store.get_room("lobby").await.unwrap().unwrap();
        assert_eq!(room.required_players, 2);
        assert!(store.get_room("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_and_zero_players_rejected() {
        let store = MemoryRoomStore::new();
        store.create_room(RoomRecord::new("lobby", 2)).await.unwrap();

        assert!(store.create_room(RoomRecord::new("lobby", 2)).await.is_err());
        assert!(store.create_room(RoomRecord::new("empty", 0)).await.is_err());
    }

    #[tokio::test]
    async fn test_racing_start_writes_are_idempotent() {
        let store = MemoryRoomStore::new();
        store.create_room(RoomRecord::new("lobby", 2)).await.unwrap();

        let (a, b) = tokio::join!(
            store.update_room("lobby", RoomUpdate::start()),
            store.update_room("lobby", RoomUpdate::start()),
        );
        assert_eq!(a.unwrap(), UpdateOutcome::Applied);
        assert_eq!(b.unwrap(), UpdateOutcome::Applied);

        let room = store.get_room("lobby").await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Started);
        assert!(room.started_at.is_some());
    }

    #[tokio::test]
    async fn test_update_notifies_subscribers() {
        let store = MemoryRoomStore::new();
        store.create_room(RoomRecord::new("lobby", 2)).await.unwrap();
        store.create_room(RoomRecord::new("other", 2)).await.unwrap();
        let mut sub = store.subscribe_changes("lobby").await.unwrap();

        store.update_room("other", RoomUpdate::start()).await.unwrap();
        store.update_room("lobby", RoomUpdate::start()).await.unwrap();

        let room = sub.next().await.unwrap();
        assert_eq!(room.id, "lobby");
        assert_eq!(room.status, RoomStatus::Started);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_feed_order_matches_apply_order() {
        let store = MemoryRoomStore::new();
        store.create_room(RoomRecord::new("lobby", 2)).await.unwrap();
        let mut sub = store.subscribe_changes("lobby").await.unwrap();

        for _ in 0..200 {
            let (start, reset) = tokio::join!(
                tokio::spawn({
                    let store = store.clone();
                    async move { store.update_room("lobby", RoomUpdate::start()).await }
                }),
                tokio::spawn({
                    let store = store.clone();
                    async move { store.update_room("lobby", RoomUpdate::reset()).await }
                }),
            );
            assert_eq!(start.unwrap().unwrap(), UpdateOutcome::Applied);
            assert_eq!(reset.unwrap().unwrap(), UpdateOutcome::Applied);

            sub.next().await.unwrap();
            let last = sub.next().await.unwrap();
            let stored = store.get_room("lobby").await.unwrap().unwrap();
            assert_eq!(last.status, stored.status);
        }
    }

    #[tokio::test]
    async fn test_update_missing_room() {
        let store = MemoryRoomStore::new();
        let result = store.update_room("ghost", RoomUpdate::start()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
