//! Quorum detection and writer election
//!
//! Every client evaluates the same rule over its latest membership
//! snapshot: once the room is waiting and enough members are present,
//! the lexicographically smallest identity is the only client allowed
//! to flip the room to `started`. Clients holding equivalent snapshots
//! agree on the writer without talking to each other. The write itself
//! is idempotent, so a rare second writer (divergent snapshots) is
//! harmless.

use crate::identity::ClientIdentity;
use crate::invariants::assert_identity_valid;
use crate::models::{MembershipSnapshot, RoomRecord, RoomStatus, RoomUpdate};

/// Result of evaluating a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionResult {
    /// Room is not waiting; quorum is only meaningful before the start
    NotWaiting,
    /// Not enough members present yet
    BelowQuorum { present: usize, required: u32 },
    /// Quorum reached, another member performs the write
    Deferred { writer: ClientIdentity },
    /// Quorum reached and this client is the elected writer
    Elected,
}

impl ElectionResult {
    pub fn should_write(&self) -> bool {
        matches!(self, ElectionResult::Elected)
    }
}

/// Quorum elector bound to one local client
#[derive(Debug, Clone)]
pub struct QuorumElector {
    local: ClientIdentity,
    /// Add a `status == waiting` predicate to the start write
    guarded: bool,
}

impl QuorumElector {
    pub fn new(local: ClientIdentity) -> Self {
        assert_identity_valid(&local, "QuorumElector::new");
        Self {
            local,
            guarded: false,
        }
    }

    pub fn with_guard(mut self, guarded: bool) -> Self {
        self.guarded = guarded;
        self
    }

    pub fn local(&self) -> &ClientIdentity {
        &self.local
    }

    /// Evaluate a membership snapshot against the latest room record
    pub fn evaluate(&self, snapshot: &MembershipSnapshot, room: &RoomRecord) -> ElectionResult {
        if room.status != RoomStatus::Waiting {
            return ElectionResult::NotWaiting;
        }

        if snapshot.len() < room.required_players as usize {
            return ElectionResult::BelowQuorum {
                present: snapshot.len(),
                required: room.required_players,
            };
        }

        match snapshot.smallest() {
            Some(writer) if *writer == self.local => ElectionResult::Elected,
            Some(writer) => ElectionResult::Deferred {
                writer: writer.clone(),
            },
            // Only reachable with required_players == 0, which rooms reject
            None => ElectionResult::BelowQuorum {
                present: 0,
                required: room.required_players,
            },
        }
    }

    /// The single write the elected client issues
    pub fn start_update(&self) -> RoomUpdate {
        if self.guarded {
            RoomUpdate::start().guarded(RoomStatus::Waiting)
        } else {
            RoomUpdate::start()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(ids: &[&str]) -> MembershipSnapshot {
        ids.iter().map(|id| ClientIdentity::from(*id)).collect()
    }

    #[test]
    fn test_smallest_identity_is_elected() {
        let room = RoomRecord::new("lobby", 2);
        let members = snapshot(&["bbb", "aaa"]);

        let a = QuorumElector::new("aaa".into());
        let b = QuorumElector::new("bbb".into());

        assert_eq!(a.evaluate(&members, &room), ElectionResult::Elected);
        assert_eq!(
            b.evaluate(&members, &room),
            ElectionResult::Deferred {
                writer: "aaa".into()
            }
        );
    }

    #[test]
    fn test_exactly_one_writer_for_any_quorum() {
        let room = RoomRecord::new("lobby", 3);
        let ids = ["m7", "c2", "z0", "c10", "a9"];
        let members = snapshot(&ids);

        let writers: Vec<_> = ids
            .iter()
            .filter(|id| {
                QuorumElector::new((**id).into())
                    .evaluate(&members, &room)
                    .should_write()
            })
            .collect();

        assert_eq!(writers, vec![&"a9"]);
    }

    #[test]
    fn test_below_quorum() {
        let room = RoomRecord::new("lobby", 2);
        let elector = QuorumElector::new("aaa".into());

        assert_eq!(
            elector.evaluate(&snapshot(&["aaa"]), &room),
            ElectionResult::BelowQuorum {
                present: 1,
                required: 2
            }
        );
    }

    #[test]
    fn test_started_room_is_ignored() {
        let mut room = RoomRecord::new("lobby", 1);
        room.status = RoomStatus::Started;
        let elector = QuorumElector::new("aaa".into());

        assert_eq!(
            elector.evaluate(&snapshot(&["aaa"]), &room),
            ElectionResult::NotWaiting
        );
    }

    #[test]
    fn test_over_quorum_still_elects() {
        let room = RoomRecord::new("lobby", 2);
        let elector = QuorumElector::new("a".into());

        assert!(elector.evaluate(&snapshot(&["a", "b", "c"]), &room).should_write());
    }

    #[test]
    fn test_guarded_update() {
        let plain = QuorumElector::new("a".into());
        let guarded = QuorumElector::new("a".into()).with_guard(true);

        assert_eq!(plain.start_update().expect_status, None);
        assert_eq!(
            guarded.start_update().expect_status,
            Some(RoomStatus::Waiting)
        );
    }
}
