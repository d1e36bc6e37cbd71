//! In-process presence hub
//!
//! Every subscriber of a channel gets a full snapshot whenever the set
//! of tracked identities changes. Dropping a channel handle counts as
//! a disconnect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use super::{PresenceChannel, PresenceEvent, PresenceTransport};
use crate::error::{Error, Result};
use crate::identity::ClientIdentity;
use crate::models::MembershipSnapshot;

#[derive(Clone, Default)]
pub struct LocalPresenceHub {
    channels: Arc<Mutex<HashMap<String, ChannelState>>>,
}

#[derive(Default)]
struct ChannelState {
    next_member: u64,
    members: HashMap<u64, Member>,
}

struct Member {
    tracked: Option<ClientIdentity>,
    tx: mpsc::UnboundedSender<PresenceEvent>,
}

impl ChannelState {
    fn snapshot(&self) -> MembershipSnapshot {
        self.members
            .values()
            .filter_map(|m| m.tracked.clone())
            .collect()
    }

    fn broadcast(&self, event: PresenceEvent) {
        for member in self.members.values() {
            // A closed receiver is about to be removed by its Drop
            let _ = member.tx.send(event.clone());
        }
    }

    fn sync(&self) {
        self.broadcast(PresenceEvent::Sync(self.snapshot()));
    }
}

impl LocalPresenceHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identities currently tracked on a channel
    pub fn members(&self, channel_name: &str) -> MembershipSnapshot {
        self.with_channels(|channels| {
            channels
                .get(channel_name)
                .map(ChannelState::snapshot)
                .unwrap_or_default()
        })
    }

    /// Simulate a transport reconnect: presence entries are lost and
    /// every subscriber is told it has been subscribed again.
    pub fn reconnect(&self, channel_name: &str) {
        self.with_channels(|channels| {
            if let Some(state) = channels.get_mut(channel_name) {
                for member in state.members.values_mut() {
                    member.tracked = None;
                }
                state.sync();
                state.broadcast(PresenceEvent::Subscribed);
            }
        });
    }

    fn with_channels<R>(&self, f: impl FnOnce(&mut HashMap<String, ChannelState>) -> R) -> R {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut channels)
    }

    fn track(&self, channel_name: &str, member_id: u64, identity: &ClientIdentity) -> Result<()> {
        self.with_channels(|channels| {
            let state = channels
                .get_mut(channel_name)
                .ok_or_else(|| Error::Transport(format!("Not subscribed to {}", channel_name)))?;
            let member = state
                .members
                .get_mut(&member_id)
                .ok_or_else(|| Error::Transport(format!("Not subscribed to {}", channel_name)))?;

            member.tracked = Some(identity.clone());
            state.sync();
            Ok(())
        })
    }

    fn leave(&self, channel_name: &str, member_id: u64) {
        self.with_channels(|channels| {
            let Some(state) = channels.get_mut(channel_name) else {
                return;
            };
            if state.members.remove(&member_id).is_some() {
                debug!(channel = %channel_name, member_id, "Presence member left");
                state.sync();
            }
            if state.members.is_empty() {
                channels.remove(channel_name);
            }
        });
    }
}

impl PresenceTransport for LocalPresenceHub {
    type Channel = LocalPresenceChannel;

    async fn subscribe(
        &self,
        channel_name: &str,
        presence_key: &ClientIdentity,
    ) -> Result<LocalPresenceChannel> {
        let (tx, rx) = mpsc::unbounded_channel();

        let member_id = self.with_channels(|channels| {
            let state = channels.entry(channel_name.to_string()).or_default();
            let member_id = state.next_member;
            state.next_member += 1;

            let _ = tx.send(PresenceEvent::Subscribed);
            let _ = tx.send(PresenceEvent::Sync(state.snapshot()));
            state.members.insert(member_id, Member { tracked: None, tx });
            member_id
        });

        debug!(channel = %channel_name, key = %presence_key, "Presence subscribed");

        Ok(LocalPresenceChannel {
            hub: self.clone(),
            channel_name: channel_name.to_string(),
            member_id,
            rx,
        })
    }
}

/// Handle to one subscription on a [`LocalPresenceHub`] channel
pub struct LocalPresenceChannel {
    hub: LocalPresenceHub,
    channel_name: String,
    member_id: u64,
    rx: mpsc::UnboundedReceiver<PresenceEvent>,
}

impl PresenceChannel for LocalPresenceChannel {
    async fn track(&mut self, identity: &ClientIdentity) -> Result<()> {
        self.hub.track(&self.channel_name, self.member_id, identity)
    }

    async fn next_event(&mut self) -> PresenceEvent {
        self.rx.recv().await.unwrap_or(PresenceEvent::Closed)
    }

    async fn unsubscribe(self) -> Result<()> {
        // Drop removes the entry
        Ok(())
    }
}

impl Drop for LocalPresenceChannel {
    fn drop(&mut self) {
        self.hub.leave(&self.channel_name, self.member_id);
    }
}
