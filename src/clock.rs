use std::ops::Sub;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

// ─── Readings ────────────────────────────────────────────────────

/// A monotonic clock reading: time elapsed since a process-local anchor.
///
/// Only ever subtracted from other readings taken by the same clock in the
/// same process run. Never persisted or compared across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MonotonicTime(Duration);

impl MonotonicTime {
    pub const ZERO: MonotonicTime = MonotonicTime(Duration::ZERO);

    pub fn from_duration(since_anchor: Duration) -> Self {
        Self(since_anchor)
    }

    pub fn since_anchor(self) -> Duration {
        self.0
    }

    /// Elapsed time from `earlier` to `self`, clamped at zero.
    pub fn duration_since(self, earlier: MonotonicTime) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Sub for MonotonicTime {
    type Output = Duration;

    fn sub(self, rhs: MonotonicTime) -> Duration {
        self.duration_since(rhs)
    }
}

// ─── Clock contract ──────────────────────────────────────────────

/// Source of wall-clock and monotonic timestamps.
///
/// Wall time is for display and correlation; monotonic time is the only
/// value used to compute durations.
pub trait Clock: Send + Sync {
    fn now_wall(&self) -> DateTime<Utc>;
    fn now_monotonic(&self) -> MonotonicTime;
}

// ─── System clock ────────────────────────────────────────────────

static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Real clocks: `chrono::Utc::now()` and `std::time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_wall(&self) -> DateTime<Utc> {
        Utc::now()
    }

    #[inline]
    fn now_monotonic(&self) -> MonotonicTime {
        let anchor = *ANCHOR.get_or_init(Instant::now);
        MonotonicTime(anchor.elapsed())
    }
}

// ─── Manual clock ────────────────────────────────────────────────

/// A clock that only moves when told to.
///
/// Wall time tracks the monotonic reading from a fixed base, so both
/// advance together. Used by tests and the demo to get exact durations.
#[derive(Debug)]
pub struct ManualClock {
    wall_base: DateTime<Utc>,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(DateTime::<Utc>::default())
    }

    pub fn starting_at(wall_base: DateTime<Utc>) -> Self {
        Self {
            wall_base,
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock() += by;
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_wall(&self) -> DateTime<Utc> {
        let elapsed = *self.elapsed.lock();
        // chrono::Duration cannot hold every std Duration; fall back to the base
        chrono::Duration::from_std(elapsed)
            .ok()
            .and_then(|d| self.wall_base.checked_add_signed(d))
            .unwrap_or(self.wall_base)
    }

    fn now_monotonic(&self) -> MonotonicTime {
        MonotonicTime(*self.elapsed.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now_monotonic();
        let b = clock.now_monotonic();
        assert!(b >= a);
    }

    #[test]
    fn manual_clock_moves_both_readings() {
        let clock = ManualClock::new();
        let wall0 = clock.now_wall();
        let mono0 = clock.now_monotonic();

        clock.advance_ms(250);

        assert_eq!(clock.now_monotonic() - mono0, Duration::from_millis(250));
        assert_eq!(
            (clock.now_wall() - wall0).num_milliseconds(),
            250,
        );
    }

    #[test]
    fn duration_since_clamps_at_zero() {
        let early = MonotonicTime::from_duration(Duration::from_millis(5));
        let late = MonotonicTime::from_duration(Duration::from_millis(9));
        assert_eq!(late - early, Duration::from_millis(4));
        assert_eq!(early - late, Duration::ZERO);
    }
}
