//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use crate::identity::ClientIdentity;
use crate::models::{RoomRecord, RoomStatus};
use crate::phase::Phase;

/// Validate that a room record is internally consistent
pub fn assert_room_invariants(room: &RoomRecord) {
    debug_assert!(
        room.required_players > 0,
        "Room {} requires zero players",
        room.id
    );

    // started_at tracks the status exactly
    debug_assert!(
        (room.status == RoomStatus::Started) == room.started_at.is_some(),
        "Room {} has status {} but started_at {:?}",
        room.id,
        room.status,
        room.started_at
    );

    debug_assert!(
        room.updated_at >= room.created_at,
        "Room {} updated before it was created",
        room.id
    );
}

/// Validate that an identity can be used as a presence key
pub fn assert_identity_valid(identity: &ClientIdentity, context: &str) {
    debug_assert!(
        !identity.as_str().is_empty(),
        "Empty client identity in context: {}",
        context
    );
}

/// Validate that a phase agrees with the timer state
pub fn assert_phase_timer_consistent(phase: Phase, has_timer: bool) {
    debug_assert!(
        has_timer == (phase == Phase::Intro),
        "Phase {} with pending timer: {}",
        phase,
        has_timer
    );
}
