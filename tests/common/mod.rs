#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use graphql_timings::{Clock, Instrumentation, ManualClock, MonotonicTime, TimingsConfig};

/// Wraps a manual clock and counts every read.
#[derive(Default)]
pub struct CountingClock {
    inner: ManualClock,
    reads: AtomicUsize,
}

impl CountingClock {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn advance_ms(&self, ms: u64) {
        self.inner.advance_ms(ms);
    }
}

impl Clock for CountingClock {
    fn now_wall(&self) -> DateTime<Utc> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.now_wall()
    }

    fn now_monotonic(&self) -> MonotonicTime {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.now_monotonic()
    }
}

pub fn manual() -> (Arc<ManualClock>, Instrumentation) {
    let clock = Arc::new(ManualClock::new());
    let timings = Instrumentation::with_clock(clock.clone(), TimingsConfig::default());
    (clock, timings)
}

pub fn counting() -> (Arc<CountingClock>, Instrumentation) {
    let clock = Arc::new(CountingClock::default());
    let timings = Instrumentation::with_clock(clock.clone(), TimingsConfig::default());
    (clock, timings)
}
