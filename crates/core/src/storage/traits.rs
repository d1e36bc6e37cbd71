//! Storage repository traits
//!
//! The room store is the only shared mutable state between clients.
//! Implementations may be in-memory, SQLite, or a remote hub.

use std::future::Future;

use crate::error::Result;
use crate::models::{RoomRecord, RoomUpdate, UpdateOutcome};

use super::Subscription;

/// Room record store with a per-room change feed
pub trait RoomStore: Send + Sync {
    /// Insert a new room. Fails if the id is taken or `required_players` is zero.
    fn create_room(&self, room: RoomRecord) -> impl Future<Output = Result<RoomRecord>> + Send;

    /// Point read by room id
    fn get_room(&self, room_id: &str) -> impl Future<Output = Result<Option<RoomRecord>>> + Send;

    /// Field-set update filtered by room id. Every applied update is
    /// pushed to the room's change feed, redundant ones included.
    fn update_room(
        &self,
        room_id: &str,
        update: RoomUpdate,
    ) -> impl Future<Output = Result<UpdateOutcome>> + Send;

    /// Subscribe to updates of one room
    fn subscribe_changes(&self, room_id: &str) -> impl Future<Output = Result<Subscription>> + Send;

    /// List all rooms ordered by id
    fn list_rooms(&self) -> impl Future<Output = Result<Vec<RoomRecord>>> + Send;
}
