//! Change listener for a single room
//!
//! Keeps the locally cached room record. The cache is last-receipt-wins:
//! whatever reaches this client later (the initial point read or a
//! pushed change) replaces what came before.

use tracing::debug;

use crate::error::Result;
use crate::models::{RoomRecord, RoomStatus};
use crate::storage::{RoomStore, Subscription};

pub struct ChangeListener {
    subscription: Subscription,
    cached: Option<RoomRecord>,
}

impl ChangeListener {
    pub async fn subscribe<S: RoomStore>(store: &S, room_id: &str) -> Result<Self> {
        let subscription = store.subscribe_changes(room_id).await?;
        debug!(room_id = %room_id, "Subscribed to room changes");
        Ok(Self {
            subscription,
            cached: None,
        })
    }

    pub fn room_id(&self) -> &str {
        self.subscription.room_id()
    }

    /// Latest room record received, if any
    pub fn room(&self) -> Option<&RoomRecord> {
        self.cached.as_ref()
    }

    /// Replace the cache with a record received outside the feed
    pub fn record(&mut self, room: RoomRecord) -> RoomStatus {
        let status = room.status;
        self.cached = Some(room);
        status
    }

    /// Wait for the next pushed change and cache it. Cancel-safe.
    ///
    /// Returns the new status, or `None` once the feed is closed.
    pub async fn next_change(&mut self) -> Option<RoomStatus> {
        let room = self.subscription.next().await?;
        debug!(room_id = %room.id, status = %room.status, "Room changed");
        Some(self.record(room))
    }

    pub fn close(self) {
        self.subscription.unsubscribe();
    }
}
