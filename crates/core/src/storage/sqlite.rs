//! SQLite-backed room store

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::debug;

use super::{validate_new_room, Database, RoomStore, Subscription, CHANGE_BUFFER};
use crate::error::{Error, Result};
use crate::invariants::assert_room_invariants;
use crate::models::{RoomRecord, RoomUpdate, UpdateOutcome};

/// Room store persisted in SQLite. Clones share the connection and
/// the change feed.
///
/// Change notifications only cover writes made through this handle;
/// other processes writing the same file are not observed.
#[derive(Clone)]
pub struct SqliteRoomStore {
    db: Arc<Mutex<Database>>,
    changes: broadcast::Sender<RoomRecord>,
}

impl SqliteRoomStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_database(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    pub fn from_database(db: Database) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            db: Arc::new(Mutex::new(db)),
            changes,
        }
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| Error::Store("Database lock poisoned".into()))
    }
}

impl RoomStore for SqliteRoomStore {
    async fn create_room(&self, room: RoomRecord) -> Result<RoomRecord> {
        validate_new_room(&room)?;

        let db = self.db()?;
        if db.rooms().find_by_id(&room.id)?.is_some() {
            return Err(Error::InvalidOperation(format!(
                "Room '{}' already exists",
                room.id
            )));
        }
        db.rooms().create(&room)?;
        Ok(room)
    }

    async fn get_room(&self, room_id: &str) -> Result<Option<RoomRecord>> {
        self.db()?.rooms().find_by_id(room_id)
    }

    async fn update_room(&self, room_id: &str, update: RoomUpdate) -> Result<UpdateOutcome> {
        let db = self.db()?;
        let (room, outcome) = db
            .rooms()
            .apply_update(room_id, &update, Utc::now())?
            .ok_or_else(|| Error::NotFound(format!("Room '{}'", room_id)))?;
        assert_room_invariants(&room);

        // Published while the connection is held so feed order matches commit order
        if outcome == UpdateOutcome::Applied && self.changes.send(room).is_err() {
            debug!(room_id = %room_id, "No change subscribers");
        }
        drop(db);

        Ok(outcome)
    }

    async fn subscribe_changes(&self, room_id: &str) -> Result<Subscription> {
        Ok(Subscription::from_broadcast(room_id, self.changes.subscribe()))
    }

    async fn list_rooms(&self) -> Result<Vec<RoomRecord>> {
        self.db()?.rooms().list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RoomContent, RoomStatus};

    #[tokio::test]
    async fn test_roundtrip_room() {
        let store = SqliteRoomStore::open_in_memory().unwrap();
        let room = RoomRecord::new("lobby", 4).with_content(RoomContent {
            title: "Trivia night".into(),
            subtitle: Some("Round one".into()),
            rules: None,
        });
        store.create_room(room.clone()).await.unwrap();

        let loaded = store.get_room("lobby").await.unwrap().unwrap();
        assert_eq!(loaded.content, room.content);
        assert_eq!(loaded.required_players, 4);
        assert_eq!(loaded.status, RoomStatus::Waiting);
    }

    #[tokio::test]
    async fn test_double_start_keeps_first_started_at() {
        let store = SqliteRoomStore::open_in_memory().unwrap();
        store.create_room(RoomRecord::new("lobby", 2)).await.unwrap();

        store.update_room("lobby", RoomUpdate::start()).await.unwrap();
        let first = store.get_room("lobby").await.unwrap().unwrap();
        store.update_room("lobby", RoomUpdate::start()).await.unwrap();
        let second = store.get_room("lobby").await.unwrap().unwrap();

        assert_eq!(second.status, RoomStatus::Started);
        assert_eq!(second.started_at, first.started_at);
    }

    #[tokio::test]
    async fn test_guarded_update_skipped() {
        let store = SqliteRoomStore::open_in_memory().unwrap();
        store.create_room(RoomRecord::new("lobby", 2)).await.unwrap();
        let guarded = RoomUpdate::start().guarded(RoomStatus::Waiting);

        assert_eq!(
            store.update_room("lobby", guarded).await.unwrap(),
            UpdateOutcome::Applied
        );
        assert_eq!(
            store.update_room("lobby", guarded).await.unwrap(),
            UpdateOutcome::Skipped {
                current: RoomStatus::Started
            }
        );
    }

    #[tokio::test]
    async fn test_change_feed() {
        let store = SqliteRoomStore::open_in_memory().unwrap();
        store.create_room(RoomRecord::new("lobby", 2)).await.unwrap();
        let mut sub = store.subscribe_changes("lobby").await.unwrap();

        store.update_room("lobby", RoomUpdate::start()).await.unwrap();
        store.update_room("lobby", RoomUpdate::reset()).await.unwrap();

        assert_eq!(sub.next().await.unwrap().status, RoomStatus::Started);
        assert_eq!(sub.next().await.unwrap().status, RoomStatus::Waiting);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rooms.db");

        {
            let store = SqliteRoomStore::open(&path).unwrap();
            store.create_room(RoomRecord::new("lobby", 3)).await.unwrap();
            store.update_room("lobby", RoomUpdate::start()).await.unwrap();
        }

        let store = SqliteRoomStore::open(&path).unwrap();
        let rooms = store.list_rooms().await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].status, RoomStatus::Started);
        assert!(rooms[0].started_at.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_room() {
        let store = SqliteRoomStore::open_in_memory().unwrap();
        let result = store.update_room("ghost", RoomUpdate::start()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_feed_order_matches_commit_order() {
        let store = SqliteRoomStore::open_in_memory().unwrap();
        store.create_room(RoomRecord::new("lobby", 2)).await.unwrap();
        let mut sub = store.subscribe_changes("lobby").await.unwrap();

        for _ in 0..100 {
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
}
