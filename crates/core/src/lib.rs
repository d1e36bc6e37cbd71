//! Huddle Core Library
//!
//! Leaderless room coordination: clients announce themselves on a
//! presence channel, the smallest present identity flips the room to
//! `started` once quorum is reached, and every client derives its own
//! timed display phase from the room status it observes.

pub mod config;
pub mod election;
pub mod error;
pub mod identity;
pub mod invariants;
pub mod listener;
pub mod models;
pub mod phase;
pub mod presence;
pub mod session;
pub mod storage;

pub use config::{Config, HubConfig, SessionConfig};
pub use election::{ElectionResult, QuorumElector};
pub use error::{Error, Result};
pub use identity::ClientIdentity;
pub use listener::ChangeListener;
pub use models::*;
pub use phase::{LateJoin, Phase, PhaseController, DEFAULT_INTRO_DURATION};
pub use presence::{
    LocalPresenceHub, MembershipTracker, MembershipUpdate, PresenceChannel, PresenceEvent,
    PresenceTransport,
};
pub use session::{RoomSession, SessionHandle};
pub use storage::{Database, MemoryRoomStore, RoomStore, SqliteRoomStore, Subscription};
