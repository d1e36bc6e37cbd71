//! Huddle Network Library
//!
//! TCP transport that lets clients on different machines share one
//! room store and one set of presence channels.
//!
//! # Architecture
//!
//! - **Hub**: owns the room store and presence state, accepts clients
//! - **HubClient**: connects to a hub; usable as both `RoomStore` and
//!   `PresenceTransport` for a `RoomSession`
//! - **Protocol**: Length-prefixed JSON messages
//!
//! # Usage
//!
//! ```ignore
//! let hub = Hub::start(&config.hub, SqliteRoomStore::open(path)?).await?;
//!
//! let client = HubClient::connect(hub.addr()).await?;
//! let session = RoomSession::join(
//!     &config.session,
//!     ClientIdentity::generate(),
//!     "lobby",
//!     Arc::new(client.clone()),
//!     &client,
//! )
//! .await?;
//! ```

pub mod client;
pub mod error;
mod frame;
pub mod protocol;
pub mod server;

pub use client::{HubClient, HubPresenceChannel};
pub use error::{Error, Result};
pub use protocol::{ErrorCode, Message, Reply};
pub use server::Hub;

/// Default port for huddle hubs
pub const DEFAULT_PORT: u16 = huddle_core::config::DEFAULT_HUB_PORT;
