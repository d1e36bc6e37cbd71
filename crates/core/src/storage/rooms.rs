//! Room storage operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::instrument;

use super::parse::{parse_datetime, parse_datetime_opt, parse_status, OptionalExt};
use crate::error::Result;
use crate::models::{RoomContent, RoomRecord, RoomUpdate, UpdateOutcome};

const ROOM_COLUMNS: &str = "id, status, required_players, title, subtitle, rules, created_at, updated_at, started_at";

pub struct RoomTable<'a> {
    conn: &'a Connection,
}

impl<'a> RoomTable<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a new room
    #[instrument(skip(self, room), fields(room_id = %room.id))]
    pub fn create(&self, room: &RoomRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO rooms (id, status, required_players, title, subtitle, rules, created_at, updated_at, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                room.id,
                room.status.as_str(),
                room.required_players,
                room.content.title,
                room.content.subtitle,
                room.content.rules,
                room.created_at.to_rfc3339(),
                room.updated_at.to_rfc3339(),
                room.started_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Find room by id
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: &str) -> Result<Option<RoomRecord>> {
        let sql = format!("SELECT {} FROM rooms WHERE id = ?1", ROOM_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let room = stmt.query_row(params![id], room_from_row).optional()?;
        Ok(room)
    }

    /// Read-modify-write of the status columns inside one transaction.
    ///
    /// Returns `None` when the room does not exist.
    #[instrument(skip(self, update), fields(status = %update.status))]
    pub fn apply_update(
        &self,
        id: &str,
        update: &RoomUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<(RoomRecord, UpdateOutcome)>> {
        let tx = self.conn.unchecked_transaction()?;

        let Some(mut room) = self.find_by_id(id)? else {
            return Ok(None);
        };

        let outcome = room.apply(update, now);
        if outcome == UpdateOutcome::Applied {
            self.conn.execute(
                "UPDATE rooms SET status = ?1, updated_at = ?2, started_at = ?3 WHERE id = ?4",
                params![
                    room.status.as_str(),
                    room.updated_at.to_rfc3339(),
                    room.started_at.map(|t| t.to_rfc3339()),
                    id,
                ],
            )?;
        }

        tx.commit()?;
        Ok(Some((room, outcome)))
    }

    /// List all rooms
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<RoomRecord>> {
        let sql = format!("SELECT {} FROM rooms ORDER BY id", ROOM_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rooms = stmt
            .query_map([], room_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rooms)
    }
}

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<RoomRecord> {
    Ok(RoomRecord {
        id: row.get(0)?,
        status: parse_status(&row.get::<_, String>(1)?)?,
        required_players: row.get(2)?,
        content: RoomContent {
            title: row.get(3)?,
            subtitle: row.get(4)?,
            rules: row.get(5)?,
        },
        created_at: parse_datetime(&row.get::<_, String>(6)?)?,
        updated_at: parse_datetime(&row.get::<_, String>(7)?)?,
        started_at: parse_datetime_opt(row.get::<_, Option<String>>(8)?)?,
    })
}
