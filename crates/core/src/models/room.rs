//! Room model - the shared coordination record

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Lifecycle status of a room. Only ever moves `Waiting -> Started`
/// within a round; a write back to `Waiting` is an external reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Started,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Waiting => "waiting",
            RoomStatus::Started => "started",
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(RoomStatus::Waiting),
            "started" => Ok(RoomStatus::Started),
            other => Err(Error::InvalidOperation(format!(
                "Unknown room status '{}'",
                other
            ))),
        }
    }
}

/// Display content shown to players; irrelevant to coordination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomContent {
    pub title: String,
    pub subtitle: Option<String>,
    pub rules: Option<String>,
}

/// Persistent room record keyed by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: String,
    pub status: RoomStatus,
    /// Fixed at creation, always positive
    pub required_players: u32,
    #[serde(default)]
    pub content: RoomContent,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set by the first transition into `Started`, cleared on reset
    pub started_at: Option<DateTime<Utc>>,
}

impl RoomRecord {
    pub fn new(id: impl Into<String>, required_players: u32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: RoomStatus::Waiting,
            required_players,
            content: RoomContent::default(),
            created_at: now,
            updated_at: now,
            started_at: None,
        }
    }

    pub fn with_content(mut self, content: RoomContent) -> Self {
        self.content = content;
        self
    }

    pub fn is_waiting(&self) -> bool {
        self.status == RoomStatus::Waiting
    }

    /// Apply a status update in place.
    ///
    /// Writing `Started` over `Started` only touches `updated_at`, so
    /// racing writers cannot move `started_at`.
    pub fn apply(&mut self, update: &RoomUpdate, now: DateTime<Utc>) -> UpdateOutcome {
        if let Some(expected) = update.expect_status {
            if self.status != expected {
                return UpdateOutcome::Skipped {
                    current: self.status,
                };
            }
        }

        match update.status {
            RoomStatus::Started if self.status != RoomStatus::Started => {
                self.started_at = Some(now);
            }
            RoomStatus::Waiting => self.started_at = None,
            RoomStatus::Started => {}
        }

        self.status = update.status;
        self.updated_at = now;
        UpdateOutcome::Applied
    }
}

/// Field-set update for a single room, filtered by primary key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomUpdate {
    pub status: RoomStatus,
    /// Optional compare-and-swap predicate on the current status
    #[serde(default)]
    pub expect_status: Option<RoomStatus>,
}

impl RoomUpdate {
    /// Unconditional `status = started`
    pub fn start() -> Self {
        Self {
            status: RoomStatus::Started,
            expect_status: None,
        }
    }

    /// Unconditional `status = waiting`
    pub fn reset() -> Self {
        Self {
            status: RoomStatus::Waiting,
            expect_status: None,
        }
    }

    /// Only apply if the stored status still equals `expected`
    pub fn guarded(mut self, expected: RoomStatus) -> Self {
        self.expect_status = Some(expected);
        self
    }
}

/// Result of a store update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Applied,
    /// The guard predicate did not match
    Skipped { current: RoomStatus },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_start_sets_started_at_once() {
        let mut room = RoomRecord::new("lobby", 2);
        let t1 = Utc::now();
        let t2 = t1 + Duration::seconds(3);

        assert_eq!(room.apply(&RoomUpdate::start(), t1), UpdateOutcome::Applied);
        assert_eq!(room.apply(&RoomUpdate::start(), t2), UpdateOutcome::Applied);

        assert_eq!(room.status, RoomStatus::Started);
        assert_eq!(room.started_at, Some(t1));
        assert_eq!(room.updated_at, t2);
    }

    #[test]
    fn test_reset_clears_started_at() {
        let mut room = RoomRecord::new("lobby", 2);
        room.apply(&RoomUpdate::start(), Utc::now());
        room.apply(&RoomUpdate::reset(), Utc::now());

        assert!(room.is_waiting());
        assert!(room.started_at.is_none());
    }

    #[test]
    fn test_guarded_update_skips_on_mismatch() {
        let mut room = RoomRecord::new("lobby", 2);
        let guarded = RoomUpdate::start().guarded(RoomStatus::Waiting);

        assert_eq!(room.apply(&guarded, Utc::now()), UpdateOutcome::Applied);
        assert_eq!(
            room.apply(&guarded, Utc::now()),
            UpdateOutcome::Skipped {
                current: RoomStatus::Started
            }
        );
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("started".parse::<RoomStatus>().unwrap(), RoomStatus::Started);
        assert!("paused".parse::<RoomStatus>().is_err());
    }
}
