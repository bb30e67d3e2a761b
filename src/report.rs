use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::analyzer::StructuralSummary;
use crate::context::{FieldTiming, QueryPhase, RequestContext};

/// Read-only snapshot of one request's captured timings.
///
/// Emitters pull this once the request is `Done` or `Aborted`. Durations
/// are whole microseconds. Anything not measured is `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingReport {
    pub request_id: Uuid,
    pub phase: QueryPhase,
    pub capture_enabled: bool,

    // Query start reference pair
    pub query_start_time: Option<DateTime<Utc>>,
    #[serde(rename = "query_start_time_monotonic_us")]
    pub query_start_monotonic_us: Option<u64>,

    // Phases
    pub parsing_start_time_offset_us: Option<u64>,
    pub parsing_duration_us: Option<u64>,
    pub validation_start_time_offset_us: Option<u64>,
    pub validation_duration_us: Option<u64>,

    // Fields, in completion order
    pub inline_field_timings: Vec<FieldTiming>,
    pub lazy_field_timings: Vec<FieldTiming>,

    pub structural_summary: Option<StructuralSummary>,
}

impl TimingReport {
    pub(crate) fn from_context(ctx: &RequestContext) -> Self {
        let start = ctx.query_start();
        let parsing = ctx.parsing();
        let validation = ctx.validation();

        Self {
            request_id: ctx.request_id(),
            phase: ctx.phase(),
            capture_enabled: ctx.is_capturing(),

            query_start_time: start.map(|s| s.wall),
            query_start_monotonic_us: start.map(|s| as_us(s.monotonic.since_anchor())),

            parsing_start_time_offset_us: parsing.map(|p| as_us(p.offset)),
            parsing_duration_us: parsing.map(|p| as_us(p.duration)),
            validation_start_time_offset_us: validation.map(|v| as_us(v.offset)),
            validation_duration_us: validation.map(|v| as_us(v.duration)),

            inline_field_timings: ctx.inline_field_timings(),
            lazy_field_timings: ctx.lazy_field_timings(),

            structural_summary: ctx.structural_summary(),
        }
    }

    /// Every field record, inline first, each group in completion order.
    pub fn all_fields(&self) -> impl Iterator<Item = &FieldTiming> {
        self.inline_field_timings
            .iter()
            .chain(self.lazy_field_timings.iter())
    }

    /// The slowest field by duration, if any were recorded.
    pub fn slowest_field(&self) -> Option<&FieldTiming> {
        self.all_fields().max_by_key(|f| f.duration)
    }
}

/// Whole microseconds, saturating at `u64::MAX`.
pub(crate) fn as_us(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// `serialize_with` helper: a `Duration` as whole microseconds.
pub(crate) fn micros<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(as_us(*d))
}
