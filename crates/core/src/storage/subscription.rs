//! Change feed subscriptions

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::RoomRecord;

/// Buffered notifications per subscription
const SUBSCRIPTION_BUFFER: usize = 64;

/// Live subscription to one room's updates.
///
/// Dropping the subscription stops delivery.
pub struct Subscription {
    room_id: String,
    rx: mpsc::Receiver<RoomRecord>,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Create a subscription paired with its sender half
    pub fn channel(room_id: impl Into<String>) -> (mpsc::Sender<RoomRecord>, Self) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        (
            tx,
            Self {
                room_id: room_id.into(),
                rx,
                forwarder: None,
            },
        )
    }

    /// Filter a store-wide broadcast of updates down to one room
    pub fn from_broadcast(
        room_id: impl Into<String>,
        mut changes: broadcast::Receiver<RoomRecord>,
    ) -> Self {
        let (tx, mut sub) = Self::channel(room_id);
        let room_id = sub.room_id.clone();

        sub.forwarder = Some(tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(room) if room.id == room_id => {
                        if tx.send(room).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(room_id = %room_id, skipped, "Change feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(room_id = %room_id, "Change feed closed");
                        break;
                    }
                }
            }
        }));

        sub
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Next update, or `None` once the feed is closed
    pub async fn next(&mut self) -> Option<RoomRecord> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}
