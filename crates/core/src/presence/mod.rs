//! Presence transport interface and the membership tracker
//!
//! The transport owns liveness: heartbeats, disconnect detection and
//! reconnection all happen below this interface. The core only
//! announces itself and consumes full membership snapshots.

mod local;
mod tracker;

use std::future::Future;

use crate::error::Result;
use crate::identity::ClientIdentity;
use crate::models::MembershipSnapshot;

pub use local::{LocalPresenceChannel, LocalPresenceHub};
pub use tracker::{MembershipTracker, MembershipUpdate};

/// Event delivered on a presence channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// The channel is (re)subscribed; presence must be announced again
    Subscribed,
    /// Complete set of present identities, replacing any earlier one
    Sync(MembershipSnapshot),
    /// The channel is gone for good
    Closed,
}

/// Presence channel name for a room
pub fn channel_name(room_id: &str) -> String {
    format!("room:{}", room_id)
}

/// Pub/sub transport offering per-room presence channels
pub trait PresenceTransport: Send + Sync {
    type Channel: PresenceChannel + 'static;

    /// Subscribe to a channel. The first event on the returned channel
    /// is `Subscribed`.
    fn subscribe(
        &self,
        channel_name: &str,
        presence_key: &ClientIdentity,
    ) -> impl Future<Output = Result<Self::Channel>> + Send;
}

/// A subscribed presence channel
pub trait PresenceChannel: Send + Sized {
    /// Announce `identity` as present
    fn track(&mut self, identity: &ClientIdentity) -> impl Future<Output = Result<()>> + Send;

    /// Next event. Must be cancel-safe.
    fn next_event(&mut self) -> impl Future<Output = PresenceEvent> + Send;

    /// Leave the channel; the transport removes our presence entry
    fn unsubscribe(self) -> impl Future<Output = Result<()>> + Send;
}
