//! Client-local phase state machine
//!
//! ```text
//!   waiting --(status=started)--> intro --(timer)--> rules
//!      ^                                               |
//!      +--------------(status=waiting, any phase)------+
//! ```
//!
//! Phases are never synchronized between clients. Each client derives
//! its phase from the room status it observes and runs its own intro
//! timer. The timer is an owned `Sleep`; replacing or dropping it is
//! the cancellation.

use std::fmt;
use std::future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, Sleep};

use crate::invariants::assert_phase_timer_consistent;
use crate::models::{RoomRecord, RoomStatus};

/// Default length of the intro phase
pub const DEFAULT_INTRO_DURATION: Duration = Duration::from_secs(5);

/// Display phase of one client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Waiting,
    Intro,
    Rules,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Waiting => "waiting",
            Phase::Intro => "intro",
            Phase::Rules => "rules",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a client that loads an already-started room enters the round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LateJoin {
    /// Always play the full intro, however long the round has run
    #[default]
    Replay,
    /// Play only what is left of the intro, measured from `started_at`
    Resume,
}

/// One-shot intro timer
struct IntroTimer {
    sleep: Pin<Box<Sleep>>,
}

impl IntroTimer {
    fn start(after: Duration) -> Self {
        Self {
            sleep: Box::pin(tokio::time::sleep(after)),
        }
    }

    fn deadline(&self) -> Instant {
        self.sleep.deadline()
    }
}

pub struct PhaseController {
    phase: Phase,
    intro_duration: Duration,
    late_join: LateJoin,
    timer: Option<IntroTimer>,
}

impl PhaseController {
    pub fn new(intro_duration: Duration) -> Self {
        Self {
            phase: Phase::Waiting,
            intro_duration,
            late_join: LateJoin::default(),
            timer: None,
        }
    }

    pub fn with_late_join(mut self, late_join: LateJoin) -> Self {
        self.late_join = late_join;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn has_pending_timer(&self) -> bool {
        self.timer.is_some()
    }

    pub fn timer_deadline(&self) -> Option<Instant> {
        self.timer.as_ref().map(IntroTimer::deadline)
    }

    /// Derive the phase from the room as first read at join time.
    ///
    /// Returns the new phase if it changed.
    pub fn load(&mut self, room: &RoomRecord) -> Option<Phase> {
        let changed = self.load_inner(room);
        assert_phase_timer_consistent(self.phase, self.timer.is_some());
        changed
    }

    fn load_inner(&mut self, room: &RoomRecord) -> Option<Phase> {
        if room.status != RoomStatus::Started || self.phase != Phase::Waiting {
            return self.apply_status(room.status);
        }

        match self.late_join {
            LateJoin::Replay => self.enter_intro(self.intro_duration),
            LateJoin::Resume => {
                let remaining = room
                    .started_at
                    .map(|at| remaining_intro(self.intro_duration, at, Utc::now()))
                    .unwrap_or(self.intro_duration);

                if remaining.is_zero() {
                    self.timer = None;
                    self.phase = Phase::Rules;
                    Some(Phase::Rules)
                } else {
                    self.enter_intro(remaining)
                }
            }
        }
    }

    /// Apply a room status received from the change feed.
    ///
    /// Returns the new phase if it changed.
    pub fn on_status(&mut self, status: RoomStatus) -> Option<Phase> {
        let changed = self.apply_status(status);
        assert_phase_timer_consistent(self.phase, self.timer.is_some());
        changed
    }

    fn apply_status(&mut self, status: RoomStatus) -> Option<Phase> {
        match status {
            RoomStatus::Started => match self.phase {
                // Redundant start notification, keep the running timer
                Phase::Intro | Phase::Rules => None,
                Phase::Waiting => self.enter_intro(self.intro_duration),
            },
            RoomStatus::Waiting => {
                self.timer = None;
                if self.phase == Phase::Waiting {
                    None
                } else {
                    self.phase = Phase::Waiting;
                    Some(Phase::Waiting)
                }
            }
        }
    }

    /// Wait for the intro timer and advance to `Rules`.
    ///
    /// Pends forever while no timer is armed. Cancel-safe: the timer
    /// lives in the controller, so dropping this future loses nothing.
    pub async fn next_timer(&mut self) -> Phase {
        match self.timer.as_mut() {
            Some(timer) => timer.sleep.as_mut().await,
            None => future::pending::<()>().await,
        }

        self.timer = None;
        self.phase = Phase::Rules;
        Phase::Rules
    }

    /// Drop any pending timer (leaving the room)
    pub fn cancel(&mut self) {
        self.timer = None;
    }

    fn enter_intro(&mut self, after: Duration) -> Option<Phase> {
        // Replacing the timer cancels the previous one
        self.timer = Some(IntroTimer::start(after));
        self.phase = Phase::Intro;
        Some(Phase::Intro)
    }
}

fn remaining_intro(intro: Duration, started_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let elapsed = (now - started_at).to_std().unwrap_or(Duration::ZERO);
    intro.saturating_sub(elapsed)
}
