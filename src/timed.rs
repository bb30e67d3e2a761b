use std::time::Duration;

use crate::clock::{Clock, MonotonicTime};

/// The outcome of one measured unit of work.
///
/// `time_since_query_start` is present iff a reference offset was supplied,
/// and then equals `start_offset - reference` exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedResult<T> {
    pub start_offset: MonotonicTime,
    pub duration: Duration,
    pub time_since_query_start: Option<Duration>,
    pub result: T,
}

impl<T> TimedResult<T> {
    /// Run `work`, timing it on `clock`.
    pub fn measure<C, F>(clock: &C, reference: Option<MonotonicTime>, work: F) -> Self
    where
        C: Clock + ?Sized,
        F: FnOnce() -> T,
    {
        let start = clock.now_monotonic();
        let result = work();
        Self::finish(clock, reference, start, result)
    }

    /// Run fallible `work`, timing it on `clock`.
    ///
    /// An `Err` is handed back exactly as `work` produced it and no
    /// measurement survives: a failed unit never reports a duration.
    pub fn try_measure<C, F, E>(
        clock: &C,
        reference: Option<MonotonicTime>,
        work: F,
    ) -> Result<Self, E>
    where
        C: Clock + ?Sized,
        F: FnOnce() -> Result<T, E>,
    {
        let start = clock.now_monotonic();
        let result = work()?;
        Ok(Self::finish(clock, reference, start, result))
    }

    /// Close a measurement whose start was read earlier, e.g. when the work
    /// settles asynchronously.
    pub fn settle<C>(
        clock: &C,
        reference: Option<MonotonicTime>,
        start: MonotonicTime,
        result: T,
    ) -> Self
    where
        C: Clock + ?Sized,
    {
        Self::finish(clock, reference, start, result)
    }

    fn finish<C: Clock + ?Sized>(
        clock: &C,
        reference: Option<MonotonicTime>,
        start: MonotonicTime,
        result: T,
    ) -> Self {
        let duration = clock.now_monotonic() - start;
        Self {
            start_offset: start,
            duration,
            time_since_query_start: reference.map(|r| start - r),
            result,
        }
    }
}
