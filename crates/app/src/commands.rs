//! Subcommand implementations
//!
//! Store commands are generic over `RoomStore` so they run the same
//! against a hub connection or a local store.

use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;

use huddle_core::{
    ClientIdentity, HubConfig, Result, RoomContent, RoomRecord, RoomSession, RoomStore,
    RoomUpdate, SessionConfig, SqliteRoomStore, UpdateOutcome,
};
use huddle_net::{Hub, HubClient};
use tracing::info;

/// Serve rooms from the configured SQLite database until `shutdown` resolves
pub async fn hub(config: &HubConfig, shutdown: impl Future<Output = ()>) -> Result<()> {
    let path = config.database_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store = SqliteRoomStore::open(&path)?;
    info!(database = %path.display(), "Opened room database");

    let hub = Hub::start(config, store).await?;
    println!("hub listening on {}", hub.addr());

    shutdown.await;
    hub.shutdown();
    Ok(())
}

pub fn build_room(
    room_id: &str,
    players: u32,
    title: Option<String>,
    subtitle: Option<String>,
    rules: Option<String>,
) -> RoomRecord {
    RoomRecord::new(room_id, players).with_content(RoomContent {
        title: title.unwrap_or_else(|| room_id.to_string()),
        subtitle,
        rules,
    })
}

pub async fn create<S: RoomStore>(store: &S, room: RoomRecord) -> Result<RoomRecord> {
    let room = store.create_room(room).await?;
    info!(room_id = %room.id, required_players = room.required_players, "Room created");
    Ok(room)
}

/// Set a room back to waiting. Every session in it drops back to the
/// waiting phase and may start again once quorum is met.
pub async fn reset<S: RoomStore>(store: &S, room_id: &str) -> Result<UpdateOutcome> {
    let outcome = store.update_room(room_id, RoomUpdate::reset()).await?;
    info!(room_id = %room_id, ?outcome, "Room reset");
    Ok(outcome)
}

pub async fn show<S: RoomStore>(store: &S, room_id: &str) -> Result<Option<RoomRecord>> {
    store.get_room(room_id).await
}

pub async fn list<S: RoomStore>(store: &S) -> Result<Vec<RoomRecord>> {
    store.list_rooms().await
}

pub fn format_room(room: &RoomRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "room:       {}", room.id);
    let _ = writeln!(out, "status:     {}", room.status);
    let _ = writeln!(out, "players:    {}", room.required_players);
    let _ = writeln!(out, "title:      {}", room.content.title);
    if let Some(subtitle) = &room.content.subtitle {
        let _ = writeln!(out, "subtitle:   {}", subtitle);
    }
    if let Some(rules) = &room.content.rules {
        let _ = writeln!(out, "rules:      {}", rules);
    }
    let _ = writeln!(out, "updated:    {}", room.updated_at.to_rfc3339());
    if let Some(started_at) = room.started_at {
        let _ = writeln!(out, "started:    {}", started_at.to_rfc3339());
    }
    out
}

/// Join a room through `client` and log phase and member changes until
/// `shutdown` resolves or the session ends
pub async fn join(
    client: HubClient,
    config: &SessionConfig,
    room_id: &str,
    identity: Option<String>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let identity = identity
        .map(ClientIdentity::new)
        .unwrap_or_else(ClientIdentity::generate);
    println!("joining {} as {}", room_id, identity);

    let session =
        RoomSession::join(config, identity, room_id, Arc::new(client.clone()), &client).await?;
    let mut phase = session.watch_phase();
    let mut members = session.watch_members();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = phase.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *phase.borrow_and_update();
                println!("phase: {}", current);
            }
            changed = members.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = *members.borrow_and_update();
                println!("members present: {}", count);
            }
        }
    }

    session.leave().await;
    info!(room_id = %room_id, "Left room");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    use huddle_core::{MemoryRoomStore, RoomStatus};

    #[tokio::test]
    async fn test_create_reset_show() {
        let store = MemoryRoomStore::new();
        let room = build_room("lobby", 2, None, Some("Round one".into()), None);
        create(&store, room).await.unwrap();

        store
            .update_room("lobby", RoomUpdate::start())
            .await
            .unwrap();
        assert_eq!(
            reset(&store, "lobby").await.unwrap(),
            UpdateOutcome::Applied
        );

        let room = show(&store, "lobby").await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Waiting);
        assert!(room.started_at.is_none());
        assert_eq!(room.content.title, "lobby");

        let text = format_room(&room);
        assert!(text.contains("status:     waiting"));
        assert!(text.contains("subtitle:   Round one"));
        assert!(!text.contains("started:"));
    }

    #[tokio::test]
    async fn test_reset_missing_room_fails() {
        let store = MemoryRoomStore::new();
        assert!(reset(&store, "nope").await.is_err());
        assert!(show(&store, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hub_serves_sqlite_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = HubConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            database: Some(dir.path().join("nested").join("huddle.db")),
            ..HubConfig::default()
        };

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn({
            let config = config.clone();
            async move {
                hub(&config, async {
                    let _ = stop_rx.await;
                })
                .await
            }
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while !dir.path().join("nested").join("huddle.db").exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let _ = stop_tx.send(());
        server.await.unwrap().unwrap();

        let store = SqliteRoomStore::open(dir.path().join("nested").join("huddle.db")).unwrap();
        assert!(list(&store).await.unwrap().is_empty());
    }
}
