//! Time sources and per-session deadlines.
//!
//! Everything that compares against "now" goes through [`Clock`], so tests
//! can drive a session with a [`ManualClock`] instead of sleeping.

mod countdown;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub use countdown::{spawn_countdown, Countdown};

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time from [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset_nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_nanos: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Total time advanced since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }
}

/// Lead-in and deadline of one capture session.
///
/// Fixed when the session starts previewing and never extended. The
/// duration counts from the start, so the lead-in is part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClock {
    started: Instant,
    lead_in: Duration,
    deadline: Instant,
}

impl SessionClock {
    /// A lead-in longer than the session is clamped to the deadline.
    pub fn new(started: Instant, lead_in: Duration, duration: Duration) -> Self {
        Self {
            started,
            lead_in: lead_in.min(duration),
            deadline: started + duration,
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn lead_in(&self) -> Duration {
        self.lead_in
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// True once frames count towards the artifact.
    pub fn lead_in_elapsed(&self, now: Instant) -> bool {
        self.elapsed(now) >= self.lead_in
    }

    pub fn expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Time left until the deadline, zero once expired.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }
}
