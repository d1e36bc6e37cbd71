//! Membership tracker
//!
//! Wraps one presence channel for one room: announces the local
//! identity whenever the channel reports a (re)subscription and keeps
//! the latest full snapshot plus an observable member count.

use tokio::sync::watch;
use tracing::{debug, info};

use super::{channel_name, PresenceChannel, PresenceEvent, PresenceTransport};
use crate::error::Result;
use crate::identity::ClientIdentity;
use crate::models::MembershipSnapshot;

/// What the tracker observed on its channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipUpdate {
    /// Channel (re)subscribed; call [`MembershipTracker::announce`]
    Subscribed,
    /// A new snapshot replaced the previous one
    Synced { members: usize },
    /// Channel closed; no further snapshots will arrive
    Closed,
}

pub struct MembershipTracker<C> {
    identity: ClientIdentity,
    channel: C,
    snapshot: MembershipSnapshot,
    count: watch::Sender<usize>,
}

impl<C: PresenceChannel> MembershipTracker<C> {
    /// Subscribe to the presence channel of `room_id`
    pub async fn subscribe<T>(transport: &T, room_id: &str, identity: ClientIdentity) -> Result<Self>
    where
        T: PresenceTransport<Channel = C>,
    {
        let channel = transport.subscribe(&channel_name(room_id), &identity).await?;
        let (count, _) = watch::channel(0);

        Ok(Self {
            identity,
            channel,
            snapshot: MembershipSnapshot::new(),
            count,
        })
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Latest snapshot received
    pub fn snapshot(&self) -> &MembershipSnapshot {
        &self.snapshot
    }

    /// Observable count of present members
    pub fn watch_count(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }

    /// Announce the local identity on the channel
    pub async fn announce(&mut self) -> Result<()> {
        self.channel.track(&self.identity).await?;
        debug!(identity = %self.identity, "Presence announced");
        Ok(())
    }

    /// Wait for the next channel event. Cancel-safe.
    pub async fn next_update(&mut self) -> MembershipUpdate {
        match self.channel.next_event().await {
            PresenceEvent::Subscribed => MembershipUpdate::Subscribed,
            PresenceEvent::Sync(snapshot) => {
                let members = snapshot.len();
                self.snapshot = snapshot;
                self.count.send_replace(members);
                MembershipUpdate::Synced { members }
            }
            PresenceEvent::Closed => MembershipUpdate::Closed,
        }
    }

    /// Leave the channel
    pub async fn leave(self) -> Result<()> {
        info!(identity = %self.identity, "Leaving presence channel");
        self.channel.unsubscribe().await
    }
}
