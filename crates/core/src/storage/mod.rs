//! Room storage layer for Huddle

mod memory;
mod migrations;
mod parse;
mod rooms;
mod sqlite;
mod subscription;
mod traits;

use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::models::RoomRecord;

pub use memory::MemoryRoomStore;
pub use rooms::RoomTable;
pub use sqlite::SqliteRoomStore;
pub use subscription::Subscription;
pub use traits::RoomStore;

/// Buffered notifications on a store-wide change broadcast
pub(crate) const CHANGE_BUFFER: usize = 256;

/// Main database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initialize database schema via migrations
    fn init(&self) -> Result<()> {
        migrations::run_migrations(&self.conn)?;
        debug!(schema_version = self.schema_version(), "Database ready");
        Ok(())
    }

    /// Get current schema version
    pub fn schema_version(&self) -> u32 {
        migrations::get_current_version(&self.conn).unwrap_or(0)
    }

    pub fn rooms(&self) -> RoomTable<'_> {
        RoomTable::new(&self.conn)
    }
}

/// Checks shared by every store before inserting a room
pub(crate) fn validate_new_room(room: &RoomRecord) -> Result<()> {
    if room.id.trim().is_empty() {
        return Err(Error::InvalidOperation("Room id must not be empty".into()));
    }
    if room.required_players == 0 {
        return Err(Error::InvalidOperation(format!(
            "Room '{}' must require at least one player",
            room.id
        )));
    }
    Ok(())
}
