//! TCP client for a hub
//!
//! One connection carries both roles a session needs: `HubClient`
//! implements `RoomStore` through request/reply messages and
//! `PresenceTransport` through hub presence channels.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use huddle_core::presence::{PresenceChannel, PresenceEvent, PresenceTransport};
use huddle_core::{ClientIdentity, RoomRecord, RoomStore, RoomUpdate, Subscription, UpdateOutcome};
use tokio::io::ReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::frame::{read_frame, writer_task};
use crate::protocol::{Message, Reply};

const OUTBOX_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
enum CloseReason {
    Rejected(String),
    Closed,
}

/// Where incoming messages go
#[derive(Default)]
struct Routes {
    pending: HashMap<u64, oneshot::Sender<Reply>>,
    channels: HashMap<String, mpsc::UnboundedSender<PresenceEvent>>,
    watches: HashMap<String, Vec<mpsc::Sender<RoomRecord>>>,
    closed: Option<CloseReason>,
}

struct Shared {
    routes: Mutex<Routes>,
    next_request: AtomicU64,
}

impl Shared {
    fn routes(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed_error(&self) -> Error {
        match &self.routes().closed {
            Some(CloseReason::Rejected(reason)) => Error::Rejected(reason.clone()),
            _ => Error::ConnectionClosed,
        }
    }

    /// Fail everything still waiting on this connection
    fn close(&self, reason: CloseReason) {
        let mut routes = self.routes();
        routes.closed = Some(reason);
        routes.pending.clear();
        for (_, events) in routes.channels.drain() {
            let _ = events.send(PresenceEvent::Closed);
        }
        routes.watches.clear();
    }
}

/// Client handle; clones share one connection
#[derive(Clone)]
pub struct HubClient {
    addr: SocketAddr,
    shared: Arc<Shared>,
    outbox: mpsc::Sender<Message>,
}

impl HubClient {
    /// Connect to a hub
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        info!(addr = %addr, "Connecting to hub");

        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = tokio::io::split(stream);

        let (outbox, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let shared = Arc::new(Shared {
            routes: Mutex::new(Routes::default()),
            next_request: AtomicU64::new(1),
        });

        tokio::spawn(writer_task(writer, outbox_rx));
        tokio::spawn(reader_task(reader, shared.clone(), outbox.downgrade()));

        Ok(HubClient {
            addr,
            shared,
            outbox,
        })
    }

    /// Address this client connected to
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether the connection is still open
    pub fn is_connected(&self) -> bool {
        self.shared.routes().closed.is_none()
    }

    /// Send a ping
    pub async fn ping(&self) -> Result<()> {
        self.send(Message::Ping).await
    }

    async fn send(&self, msg: Message) -> Result<()> {
        if !self.is_connected() {
            return Err(self.shared.closed_error());
        }
        self.outbox.send(msg).await.map_err(|_| Error::NotConnected)
    }

    /// Send a request and wait for the reply carrying its id
    async fn request(&self, build: impl FnOnce(u64) -> Message) -> Result<Reply> {
        let request_id = self.shared.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut routes = self.shared.routes();
            if routes.closed.is_some() {
                drop(routes);
                return Err(self.shared.closed_error());
            }
            routes.pending.insert(request_id, reply_tx);
        }

        if self.outbox.send(build(request_id)).await.is_err() {
            self.shared.routes().pending.remove(&request_id);
            return Err(Error::NotConnected);
        }

        match reply_rx.await {
            Ok(Reply::Error { code, message }) => Err(Error::Remote { code, message }),
            Ok(reply) => Ok(reply),
            Err(_) => Err(self.shared.closed_error()),
        }
    }

    fn forget_channel(&self, channel: &str) {
        self.shared.routes().channels.remove(channel);
    }
}

fn unexpected(reply: Reply) -> Error {
    Error::Protocol(format!("Unexpected reply: {:?}", reply))
}

impl RoomStore for HubClient {
    async fn create_room(&self, room: RoomRecord) -> huddle_core::Result<RoomRecord> {
        match self
            .request(|request_id| Message::CreateRoom { request_id, room })
            .await?
        {
            Reply::Room { room: Some(room) } => Ok(room),
            other => Err(unexpected(other).into()),
        }
    }

    async fn get_room(&self, room_id: &str) -> huddle_core::Result<Option<RoomRecord>> {
        let room_id = room_id.to_string();
        match self
            .request(|request_id| Message::GetRoom {
                request_id,
                room_id,
            })
            .await?
        {
            Reply::Room { room } => Ok(room),
            other => Err(unexpected(other).into()),
        }
    }

    async fn update_room(
        &self,
        room_id: &str,
        update: RoomUpdate,
    ) -> huddle_core::Result<UpdateOutcome> {
        let room_id = room_id.to_string();
        match self
            .request(|request_id| Message::UpdateRoom {
                request_id,
                room_id,
                update,
            })
            .await?
        {
            Reply::Updated { outcome } => Ok(outcome),
            other => Err(unexpected(other).into()),
        }
    }

    async fn subscribe_changes(&self, room_id: &str) -> huddle_core::Result<Subscription> {
        let (tx, subscription) = Subscription::channel(room_id);
        // One WatchRoom per route entry; the reader sends the matching
        // UnwatchRoom when it removes the entry
        let first = {
            let mut routes = self.shared.routes();
            match routes.watches.entry(room_id.to_string()) {
                Entry::Occupied(mut senders) => {
                    senders.get_mut().push(tx);
                    false
                }
                Entry::Vacant(slot) => {
                    slot.insert(vec![tx]);
                    true
                }
            }
        };
        if !first {
            return Ok(subscription);
        }

        let watch_id = room_id.to_string();
        let result = self
            .request(|request_id| Message::WatchRoom {
                request_id,
                room_id: watch_id,
            })
            .await;
        match result {
            Ok(Reply::Watching) => Ok(subscription),
            Ok(other) => {
                self.shared.routes().watches.remove(room_id);
                Err(unexpected(other).into())
            }
            Err(e) => {
                self.shared.routes().watches.remove(room_id);
                Err(e.into())
            }
        }
    }

    async fn list_rooms(&self) -> huddle_core::Result<Vec<RoomRecord>> {
        match self
            .request(|request_id| Message::ListRooms { request_id })
            .await?
        {
            Reply::Rooms { rooms } => Ok(rooms),
            other => Err(unexpected(other).into()),
        }
    }
}

impl PresenceTransport for HubClient {
    type Channel = HubPresenceChannel;

    async fn subscribe(
        &self,
        channel_name: &str,
        presence_key: &ClientIdentity,
    ) -> huddle_core::Result<HubPresenceChannel> {
        let (events_tx, events) = mpsc::unbounded_channel();
        {
            let mut routes = self.shared.routes();
            if routes.channels.contains_key(channel_name) {
                return Err(huddle_core::Error::InvalidOperation(format!(
                    "Already subscribed to {}",
                    channel_name
                )));
            }
            routes.channels.insert(channel_name.to_string(), events_tx);
        }

        let subscribe = Message::Subscribe {
            channel: channel_name.to_string(),
            presence_key: presence_key.clone(),
        };
        if let Err(e) = self.send(subscribe).await {
            self.forget_channel(channel_name);
            return Err(e.into());
        }

        debug!(channel = %channel_name, "Subscribed to presence channel");
        Ok(HubPresenceChannel {
            channel: channel_name.to_string(),
            events,
            client: self.clone(),
            subscribed: true,
        })
    }
}

/// A presence channel joined through a hub
pub struct HubPresenceChannel {
    channel: String,
    events: mpsc::UnboundedReceiver<PresenceEvent>,
    client: HubClient,
    subscribed: bool,
}

impl PresenceChannel for HubPresenceChannel {
    async fn track(&mut self, identity: &ClientIdentity) -> huddle_core::Result<()> {
        let track = Message::Track {
            channel: self.channel.clone(),
            identity: identity.clone(),
        };
        Ok(self.client.send(track).await?)
    }

    async fn next_event(&mut self) -> PresenceEvent {
        self.events.recv().await.unwrap_or(PresenceEvent::Closed)
    }

    async fn unsubscribe(mut self) -> huddle_core::Result<()> {
        self.subscribed = false;
        self.client.forget_channel(&self.channel);
        let leave = Message::Unsubscribe {
            channel: self.channel.clone(),
        };
        Ok(self.client.send(leave).await?)
    }
}

impl Drop for HubPresenceChannel {
    fn drop(&mut self) {
        if self.subscribed {
            self.client.forget_channel(&self.channel);
            let _ = self.client.outbox.try_send(Message::Unsubscribe {
                channel: self.channel.clone(),
            });
        }
    }
}

/// Read loop: route hub messages until the connection ends
async fn reader_task(
    mut reader: ReadHalf<TcpStream>,
    shared: Arc<Shared>,
    outbox: mpsc::WeakSender<Message>,
) {
    let reason = loop {
        match read_frame(&mut reader).await {
            Ok(Message::Rejected { reason }) => {
                warn!(reason = %reason, "Hub rejected connection");
                break CloseReason::Rejected(reason);
            }
            Ok(Message::ServerShutdown) => {
                info!("Hub is shutting down");
                break CloseReason::Closed;
            }
            Ok(msg) => route_message(msg, &shared, &outbox).await,
            Err(Error::ConnectionClosed) => {
                debug!("Hub closed connection");
                break CloseReason::Closed;
            }
            Err(e) => {
                warn!(error = %e, "Read error");
                break CloseReason::Closed;
            }
        }
    };

    shared.close(reason);
    info!("Disconnected from hub");
}

async fn route_message(msg: Message, shared: &Shared, outbox: &mpsc::WeakSender<Message>) {
    match msg {
        Message::Reply { request_id, reply } => {
            let waiter = shared.routes().pending.remove(&request_id);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(reply);
                }
                None => debug!(request_id, "Reply for abandoned request"),
            }
        }
        Message::Subscribed { channel } => {
            deliver_presence(shared, &channel, PresenceEvent::Subscribed);
        }
        Message::PresenceSync { channel, members } => {
            deliver_presence(shared, &channel, PresenceEvent::Sync(members));
        }
        Message::RoomChanged { room } => {
            let room_id = room.id.clone();
            let senders = shared.routes().watches.get(&room_id).cloned();
            let Some(senders) = senders else {
                return;
            };
            for sender in &senders {
                let _ = sender.send(room.clone()).await;
            }

            let abandoned = {
                let mut routes = shared.routes();
                match routes.watches.get_mut(&room_id) {
                    Some(watchers) => {
                        watchers.retain(|s| !s.is_closed());
                        if watchers.is_empty() {
                            routes.watches.remove(&room_id);
                            true
                        } else {
                            false
                        }
                    }
                    None => false,
                }
            };
            if abandoned {
                debug!(room_id = %room_id, "No more watchers, unwatching");
                if let Some(outbox) = outbox.upgrade() {
                    let _ = outbox.send(Message::UnwatchRoom { room_id }).await;
                }
            }
        }
        Message::Pong => {
            debug!("Received pong");
        }
        _ => {
            debug!("Ignoring unexpected message");
        }
    }
}

fn deliver_presence(shared: &Shared, channel: &str, event: PresenceEvent) {
    let routes = shared.routes();
    match routes.channels.get(channel) {
        Some(events) => {
            let _ = events.send(event);
        }
        None => debug!(channel = %channel, "Presence event for unknown channel"),
    }
}
