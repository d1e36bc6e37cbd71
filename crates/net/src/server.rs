//! TCP hub serving a room store and presence channels
//!
//! Every connection may join any number of presence channels and issue
//! store requests. Presence state lives only in the hub: when a
//! connection drops, its entries are removed and the remaining
//! subscribers receive a fresh sync.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use huddle_core::{ClientIdentity, HubConfig, MembershipSnapshot, RoomStore};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame, writer_task};
use crate::protocol::{Message, Reply};

/// Queued outgoing messages per connection
const OUTBOX_CAPACITY: usize = 64;

/// How long a closing connection may take to flush its outbox
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

type ConnId = u64;

/// Sending side of one connection's outbox
#[derive(Clone)]
struct Outbox {
    conn_id: ConnId,
    tx: mpsc::Sender<Message>,
    /// Notified to drop a client that stopped reading
    kick: Arc<Notify>,
}

impl Outbox {
    /// Queue a message without waiting. A full outbox means the client
    /// stopped reading; it is disconnected instead of stalling the hub.
    fn push(&self, msg: Message) {
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = self.conn_id, "Outbox full, disconnecting slow client");
                self.kick.notify_one();
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = self.conn_id, "Outbox closed");
            }
        }
    }
}

/// A change feed forwarded to one connection
struct Watch {
    forwarder: JoinHandle<()>,
    refs: usize,
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

struct Connection {
    outbox: Outbox,
    watches: HashMap<String, Watch>,
}

/// Hub state shared across tasks
#[derive(Default)]
struct HubState {
    next_conn: ConnId,
    connections: HashMap<ConnId, Connection>,
    /// channel -> subscribed connections and what each one tracks
    channels: HashMap<String, HashMap<ConnId, Option<ClientIdentity>>>,
}

impl HubState {
    fn register(&mut self, tx: mpsc::Sender<Message>) -> Outbox {
        self.next_conn += 1;
        let outbox = Outbox {
            conn_id: self.next_conn,
            tx,
            kick: Arc::new(Notify::new()),
        };
        self.connections.insert(
            outbox.conn_id,
            Connection {
                outbox: outbox.clone(),
                watches: HashMap::new(),
            },
        );
        outbox
    }

    fn members(&self, channel: &str) -> MembershipSnapshot {
        self.channels
            .get(channel)
            .map(|subs| subs.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Push the current membership of `channel` to all its subscribers.
    /// Never waits, so syncs leave in the order they were taken.
    fn sync(&self, channel: &str) {
        let Some(subs) = self.channels.get(channel) else {
            return;
        };
        let members = self.members(channel);
        debug!(channel = %channel, count = members.len(), "Presence sync");

        for conn_id in subs.keys() {
            if let Some(conn) = self.connections.get(conn_id) {
                conn.outbox.push(Message::PresenceSync {
                    channel: channel.to_string(),
                    members: members.clone(),
                });
            }
        }
    }

    /// Drop a subscription. Returns whether the channel still has subscribers.
    fn leave(&mut self, conn_id: ConnId, channel: &str) -> Option<bool> {
        let subs = self.channels.get_mut(channel)?;
        subs.remove(&conn_id)?;
        if subs.is_empty() {
            self.channels.remove(channel);
            Some(false)
        } else {
            Some(true)
        }
    }
}

/// Hub handle
pub struct Hub {
    addr: SocketAddr,
    state: Arc<RwLock<HubState>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Hub {
    /// Bind to `config.bind` and start serving `store`
    pub async fn start<S>(config: &HubConfig, store: S) -> Result<Self>
    where
        S: RoomStore + Clone + 'static,
    {
        let listener = TcpListener::bind(config.bind).await?;
        let addr = listener.local_addr()?;

        info!(addr = %addr, max_connections = config.max_connections, "Hub started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(RwLock::new(HubState::default()));

        tokio::spawn(accept_loop(
            listener,
            state.clone(),
            store,
            config.max_connections,
            shutdown_tx.clone(),
        ));

        Ok(Hub {
            addr,
            state,
            shutdown_tx,
        })
    }

    /// Get the hub's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of open connections
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Identities currently tracked on a channel
    pub async fn members(&self, channel: &str) -> MembershipSnapshot {
        self.state.read().await.members(channel)
    }

    /// Stop accepting and close every connection
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Hub shutdown initiated");
    }
}

async fn accept_loop<S>(
    listener: TcpListener,
    state: Arc<RwLock<HubState>>,
    store: S,
    max_connections: usize,
    shutdown_tx: broadcast::Sender<()>,
) where
    S: RoomStore + Clone + 'static,
{
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            state.clone(),
                            store.clone(),
                            max_connections,
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

async fn handle_connection<S: RoomStore>(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<RwLock<HubState>>,
    store: S,
    max_connections: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);

    let outbox = {
        let mut s = state.write().await;
        if s.connections.len() >= max_connections {
            None
        } else {
            Some(s.register(tx))
        }
    };
    let Some(outbox) = outbox else {
        warn!(addr = %addr, max_connections, "Hub full, rejecting connection");
        let reject = Message::Rejected {
            reason: "Hub is full".into(),
        };
        let _ = write_frame(&mut writer, &reject).await;
        return;
    };

    let conn_id = outbox.conn_id;
    let kick = outbox.kick.clone();
    info!(addr = %addr, conn_id, "Client connected");
    let mut writer_handle = tokio::spawn(writer_task(writer, rx));

    loop {
        tokio::select! {
            result = read_frame(&mut reader) => {
                match result {
                    Ok(msg) => handle_message(msg, &outbox, &state, &store).await,
                    Err(Error::ConnectionClosed) => {
                        debug!(conn_id, "Connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(conn_id, error = %e, "Read error");
                        break;
                    }
                }
            }
            _ = kick.notified() => {
                info!(conn_id, "Dropping client that stopped reading");
                break;
            }
            _ = shutdown_rx.recv() => {
                outbox.push(Message::ServerShutdown);
                break;
            }
        }
    }

    remove_connection(&state, conn_id).await;
    drop(outbox);
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut writer_handle)
        .await
        .is_err()
    {
        debug!(conn_id, "Writer did not drain in time");
        writer_handle.abort();
    }

    info!(conn_id, "Client disconnected");
}

async fn handle_message<S: RoomStore>(
    msg: Message,
    outbox: &Outbox,
    state: &Arc<RwLock<HubState>>,
    store: &S,
) {
    let conn_id = outbox.conn_id;
    match msg {
        Message::Subscribe {
            channel,
            presence_key,
        } => {
            debug!(conn_id, channel = %channel, presence_key = %presence_key, "Subscribe");
            let mut s = state.write().await;
            // A repeated subscribe starts over untracked
            s.channels
                .entry(channel.clone())
                .or_default()
                .insert(conn_id, None);
            outbox.push(Message::Subscribed {
                channel: channel.clone(),
            });
            s.sync(&channel);
        }
        Message::Track { channel, identity } => {
            let mut s = state.write().await;
            match s.channels.get_mut(&channel).and_then(|c| c.get_mut(&conn_id)) {
                Some(slot) => *slot = Some(identity),
                None => {
                    warn!(conn_id, channel = %channel, "Track on a channel that was never subscribed");
                    return;
                }
            }
            s.sync(&channel);
        }
        Message::Unsubscribe { channel } => {
            let mut s = state.write().await;
            if s.leave(conn_id, &channel) == Some(true) {
                s.sync(&channel);
            }
        }
        Message::CreateRoom { request_id, room } => {
            let reply = match store.create_room(room).await {
                Ok(room) => Reply::Room { room: Some(room) },
                Err(e) => Reply::from_error(&e),
            };
            outbox.push(Message::Reply { request_id, reply });
        }
        Message::GetRoom {
            request_id,
            room_id,
        } => {
            let reply = match store.get_room(&room_id).await {
                Ok(room) => Reply::Room { room },
                Err(e) => Reply::from_error(&e),
            };
            outbox.push(Message::Reply { request_id, reply });
        }
        Message::UpdateRoom {
            request_id,
            room_id,
            update,
        } => {
            let reply = match store.update_room(&room_id, update).await {
                Ok(outcome) => Reply::Updated { outcome },
                Err(e) => Reply::from_error(&e),
            };
            outbox.push(Message::Reply { request_id, reply });
        }
        Message::ListRooms { request_id } => {
            let reply = match store.list_rooms().await {
                Ok(rooms) => Reply::Rooms { rooms },
                Err(e) => Reply::from_error(&e),
            };
            outbox.push(Message::Reply { request_id, reply });
        }
        Message::WatchRoom {
            request_id,
            room_id,
        } => {
            let reply = match watch_room(outbox, &room_id, state, store).await {
                Ok(()) => Reply::Watching,
                Err(e) => Reply::from_error(&e),
            };
            outbox.push(Message::Reply { request_id, reply });
        }
        Message::UnwatchRoom { room_id } => {
            let mut s = state.write().await;
            let Some(conn) = s.connections.get_mut(&conn_id) else {
                return;
            };
            let released = match conn.watches.get_mut(&room_id) {
                Some(watch) => {
                    watch.refs -= 1;
                    watch.refs == 0
                }
                None => false,
            };
            if released {
                conn.watches.remove(&room_id);
                debug!(conn_id, room_id = %room_id, "Unwatched room");
            }
        }
        Message::Ping => {
            outbox.push(Message::Pong);
        }
        _ => {
            debug!(conn_id, "Ignoring unexpected message type");
        }
    }
}

/// Forward store changes of `room_id` to this connection. Watches are
/// counted: each `WatchRoom` needs its own `UnwatchRoom`.
async fn watch_room<S: RoomStore>(
    outbox: &Outbox,
    room_id: &str,
    state: &Arc<RwLock<HubState>>,
    store: &S,
) -> huddle_core::Result<()> {
    let conn_id = outbox.conn_id;
    {
        let mut s = state.write().await;
        if let Some(watch) = s
            .connections
            .get_mut(&conn_id)
            .and_then(|c| c.watches.get_mut(room_id))
        {
            watch.refs += 1;
            return Ok(());
        }
    }

    let mut subscription = store.subscribe_changes(room_id).await?;
    let changes = outbox.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(room) = subscription.next().await {
            changes.push(Message::RoomChanged { room });
        }
    });

    let mut s = state.write().await;
    match s.connections.get_mut(&conn_id) {
        Some(conn) => {
            conn.watches
                .insert(room_id.to_string(), Watch { forwarder, refs: 1 });
            debug!(conn_id, room_id = %room_id, "Watching room");
        }
        None => forwarder.abort(),
    }
    Ok(())
}

/// Remove a connection and resync every channel it was part of
async fn remove_connection(state: &Arc<RwLock<HubState>>, conn_id: ConnId) {
    let mut s = state.write().await;
    s.connections.remove(&conn_id);

    let joined: Vec<String> = s
        .channels
        .iter()
        .filter(|(_, subs)| subs.contains_key(&conn_id))
        .map(|(channel, _)| channel.clone())
        .collect();

    for channel in joined {
        if s.leave(conn_id, &channel) == Some(true) {
            s.sync(&channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::MemoryRoomStore;

    fn test_config() -> HubConfig {
        HubConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..HubConfig::default()
        }
    }

    #[tokio::test]
    async fn test_hub_start() {
        let hub = Hub::start(&test_config(), MemoryRoomStore::new())
            .await
            .unwrap();

        assert!(hub.addr().port() > 0);
        assert_eq!(hub.connection_count().await, 0);
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_raw_subscribe_gets_subscribed_then_sync() {
        let hub = Hub::start(&test_config(), MemoryRoomStore::new())
            .await
            .unwrap();
        let stream = TcpStream::connect(hub.addr()).await.unwrap();
        let (mut reader, mut writer) = tokio::io::split(stream);

        let subscribe = Message::Subscribe {
            channel: "room:lobby".into(),
            presence_key: ClientIdentity::from("aaa"),
        };
        write_frame(&mut writer, &subscribe).await.unwrap();
        let track = Message::Track {
            channel: "room:lobby".into(),
            identity: ClientIdentity::from("aaa"),
        };
        write_frame(&mut writer, &track).await.unwrap();

        let first: Message = read_frame(&mut reader).await.unwrap();
        assert!(matches!(first, Message::Subscribed { channel } if channel == "room:lobby"));

        let empty: Message = read_frame(&mut reader).await.unwrap();
        assert!(matches!(empty, Message::PresenceSync { members, .. } if members.is_empty()));

        let tracked: Message = read_frame(&mut reader).await.unwrap();
        match tracked {
            Message::PresenceSync { members, .. } => {
                assert!(members.contains(&ClientIdentity::from("aaa")));
                assert_eq!(members.len(), 1);
            }
            other => panic!("Wrong message: {:?}", other),
        }
        assert_eq!(hub.members("room:lobby").await.len(), 1);

        hub.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stalled_subscriber_is_dropped_without_blocking_hub() {
        let hub = Hub::start(&test_config(), MemoryRoomStore::new())
            .await
            .unwrap();

        // Subscribes and then never reads again
        let stalled = TcpStream::connect(hub.addr()).await.unwrap();
        let (_stalled_reader, mut stalled_writer) = tokio::io::split(stalled);
        let subscribe = Message::Subscribe {
            channel: "room:lobby".into(),
            presence_key: ClientIdentity::from("stalled"),
        };
        write_frame(&mut stalled_writer, &subscribe).await.unwrap();

        let flooder = TcpStream::connect(hub.addr()).await.unwrap();
        let (mut flood_reader, mut flood_writer) = tokio::io::split(flooder);
        let subscribe = Message::Subscribe {
            channel: "room:lobby".into(),
            presence_key: ClientIdentity::from("flooder"),
        };
        write_frame(&mut flood_writer, &subscribe).await.unwrap();

        // Every track fans a large sync out to the stalled peer too
        let identity = ClientIdentity::from("x".repeat(64 * 1024));
        let flood = async {
            for _ in 0..1000 {
                let track = Message::Track {
                    channel: "room:lobby".into(),
                    identity: identity.clone(),
                };
                write_frame(&mut flood_writer, &track).await.unwrap();
                // Keep pace so only the stalled peer falls behind
                let _: Message = read_frame(&mut flood_reader).await.unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(30), flood)
            .await
            .expect("hub stopped reading from the flooder");

        tokio::time::timeout(Duration::from_secs(2), hub.members("room:other"))
            .await
            .expect("hub state stayed locked");

        let dropped = async {
            while hub.connection_count().await > 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), dropped)
            .await
            .expect("stalled client was never dropped");
        assert_eq!(hub.members("room:lobby").await.len(), 1);

        hub.shutdown();
    }

    #[tokio::test]
    async fn test_full_hub_rejects() {
        let config = HubConfig {
            max_connections: 0,
            ..test_config()
        };
        let hub = Hub::start(&config, MemoryRoomStore::new()).await.unwrap();

        let mut stream = TcpStream::connect(hub.addr()).await.unwrap();
        let msg: Message = read_frame(&mut stream).await.unwrap();
        assert!(matches!(msg, Message::Rejected { .. }));

        hub.shutdown();
    }
}
