//! Room session: one client's coordination loop for one room
//!
//! All inputs (presence syncs, room changes, the intro timer and the
//! initial room read) are handled on a single task, one at a time.
//! Start writes run on their own task so a slow store never delays
//! the next snapshot.

use std::future::{self, Future};
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::election::{ElectionResult, QuorumElector};
use crate::error::Result;
use crate::identity::ClientIdentity;
use crate::listener::ChangeListener;
use crate::models::{RoomRecord, RoomStatus, UpdateOutcome};
use crate::phase::{Phase, PhaseController};
use crate::presence::{MembershipTracker, MembershipUpdate, PresenceChannel, PresenceTransport};
use crate::storage::RoomStore;

type RoomRead = Pin<Box<dyn Future<Output = Result<Option<RoomRecord>>> + Send>>;

/// Handle to a running session. Dropping it leaves the room.
pub struct SessionHandle {
    identity: ClientIdentity,
    room_id: String,
    phase: watch::Receiver<Phase>,
    members: watch::Receiver<usize>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    /// Observable count of present members
    pub fn watch_members(&self) -> watch::Receiver<usize> {
        self.members.clone()
    }

    /// Leave the room: unsubscribe from presence and changes, cancel the
    /// intro timer, and wait for the session task to finish.
    pub async fn leave(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Session task failed");
            }
        }
    }
}

/// Entry point for joining rooms
pub struct RoomSession;

impl RoomSession {
    /// Join `room_id` as `identity` and start the session loop
    pub async fn join<S, T>(
        config: &SessionConfig,
        identity: ClientIdentity,
        room_id: &str,
        store: Arc<S>,
        transport: &T,
    ) -> Result<SessionHandle>
    where
        S: RoomStore + 'static,
        T: PresenceTransport,
    {
        info!(room_id = %room_id, identity = %identity, "Joining room");

        // Subscribe before the point read so no change can slip between them
        let listener = ChangeListener::subscribe(store.as_ref(), room_id).await?;
        let tracker = MembershipTracker::subscribe(transport, room_id, identity.clone()).await?;

        let (phase_tx, phase_rx) = watch::channel(Phase::Waiting);
        let members = tracker.watch_count();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let session = SessionLoop {
            room_id: room_id.to_string(),
            store,
            tracker,
            listener,
            controller: PhaseController::new(config.intro_duration())
                .with_late_join(config.late_join),
            elector: QuorumElector::new(identity.clone()).with_guard(config.guarded_start),
            phase_tx,
            read: None,
            write: None,
        };
        let task = tokio::spawn(session.run(shutdown_rx));

        Ok(SessionHandle {
            identity,
            room_id: room_id.to_string(),
            phase: phase_rx,
            members,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

struct SessionLoop<S, C> {
    room_id: String,
    store: Arc<S>,
    tracker: MembershipTracker<C>,
    listener: ChangeListener,
    controller: PhaseController,
    elector: QuorumElector,
    phase_tx: watch::Sender<Phase>,
    /// Outstanding point read of the room
    read: Option<RoomRead>,
    /// Outstanding start write
    write: Option<JoinHandle<()>>,
}

impl<S, C> SessionLoop<S, C>
where
    S: RoomStore + 'static,
    C: PresenceChannel,
{
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        self.start_read();
        let mut presence_open = true;
        let mut changes_open = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                result = next_read(&mut self.read) => self.on_room_read(result),
                update = self.tracker.next_update(), if presence_open => {
                    presence_open = self.on_membership(update).await;
                }
                change = self.listener.next_change(), if changes_open => {
                    changes_open = self.on_change(change);
                }
                phase = self.controller.next_timer() => self.publish(phase),
            }
        }

        self.teardown().await;
    }

    fn start_read(&mut self) {
        let store = self.store.clone();
        let room_id = self.room_id.clone();
        self.read = Some(Box::pin(async move { store.get_room(&room_id).await }));
    }

    fn on_room_read(&mut self, result: Result<Option<RoomRecord>>) {
        match result {
            Ok(Some(room)) => {
                debug!(room_id = %self.room_id, status = %room.status, "Room loaded");
                if let Some(phase) = self.controller.load(&room) {
                    self.publish(phase);
                }
                self.listener.record(room);
                self.evaluate_quorum();
            }
            Ok(None) => {
                warn!(room_id = %self.room_id, "Room not found; staying in waiting");
            }
            Err(e) => {
                error!(room_id = %self.room_id, error = %e, "Failed to load room");
            }
        }
    }

    /// Returns whether the presence channel is still open
    async fn on_membership(&mut self, update: MembershipUpdate) -> bool {
        match update {
            MembershipUpdate::Subscribed => {
                if let Err(e) = self.tracker.announce().await {
                    warn!(room_id = %self.room_id, error = %e, "Failed to announce presence");
                }
                true
            }
            MembershipUpdate::Synced { members } => {
                debug!(room_id = %self.room_id, members, "Presence synced");
                if self.listener.room().is_none() && self.read.is_none() {
                    debug!(room_id = %self.room_id, "Retrying room read");
                    self.start_read();
                }
                self.evaluate_quorum();
                true
            }
            MembershipUpdate::Closed => {
                warn!(room_id = %self.room_id, "Presence channel closed; membership is stale");
                false
            }
        }
    }

    /// Returns whether the change feed is still open
    fn on_change(&mut self, change: Option<RoomStatus>) -> bool {
        let Some(status) = change else {
            warn!(room_id = %self.room_id, "Room change feed closed");
            return false;
        };

        if let Some(phase) = self.controller.on_status(status) {
            self.publish(phase);
        }
        self.evaluate_quorum();
        true
    }

    fn evaluate_quorum(&mut self) {
        let Some(room) = self.listener.room() else {
            return;
        };

        match self.elector.evaluate(self.tracker.snapshot(), room) {
            ElectionResult::Elected => self.start_room(),
            ElectionResult::Deferred { writer } => {
                debug!(room_id = %self.room_id, writer = %writer, "Quorum reached; another client starts the room");
            }
            ElectionResult::BelowQuorum { present, required } => {
                debug!(room_id = %self.room_id, present, required, "Waiting for quorum");
            }
            ElectionResult::NotWaiting => {}
        }
    }

    fn start_room(&mut self) {
        if self.write.as_ref().is_some_and(|w| !w.is_finished()) {
            debug!(room_id = %self.room_id, "Start write already in flight");
            return;
        }

        info!(
            room_id = %self.room_id,
            identity = %self.elector.local(),
            "Quorum reached; elected to start the room"
        );

        let store = self.store.clone();
        let room_id = self.room_id.clone();
        let update = self.elector.start_update();

        self.write = Some(tokio::spawn(async move {
            match store.update_room(&room_id, update).await {
                Ok(UpdateOutcome::Applied) => info!(room_id = %room_id, "Room started"),
                Ok(UpdateOutcome::Skipped { current }) => {
                    debug!(room_id = %room_id, current = %current, "Start skipped; room already moved on");
                }
                Err(e) => {
                    warn!(room_id = %room_id, error = %e, "Failed to start room; will retry on next event");
                }
            }
        }));
    }

    fn publish(&self, phase: Phase) {
        info!(room_id = %self.room_id, phase = %phase, "Phase changed");
        self.phase_tx.send_replace(phase);
    }

    async fn teardown(mut self) {
        self.controller.cancel();
        self.read = None;
        self.listener.close();
        if let Err(e) = self.tracker.leave().await {
            warn!(room_id = %self.room_id, error = %e, "Failed to leave presence channel");
        }
        info!(room_id = %self.room_id, "Left room");
    }
}

/// Await the outstanding read, pending forever when there is none.
/// Cancel-safe: the read stays in place until it completes.
async fn next_read(read: &mut Option<RoomRead>) -> Result<Option<RoomRecord>> {
    let Some(pending) = read.as_mut() else {
        return future::pending().await;
    };
    let result = pending.await;
    *read = None;
    result
}
