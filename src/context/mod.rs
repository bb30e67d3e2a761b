pub mod field;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use field::{FieldKind, FieldPath, FieldTiming, PathSegment};

use crate::analyzer::StructuralSummary;
use crate::clock::MonotonicTime;
use crate::report::TimingReport;

// ─── Per-request signals ─────────────────────────────────────────

/// Per-request opt-in signals supplied by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RequestFlags {
    /// Capture timings for this request. `None` falls back to the
    /// configured default.
    #[serde(default)]
    pub capture_timings: Option<bool>,

    /// Skip capture and analysis altogether, whatever else was asked for.
    #[serde(default)]
    pub skip_analysis: bool,
}

impl RequestFlags {
    pub fn capture(enabled: bool) -> Self {
        Self {
            capture_timings: Some(enabled),
            skip_analysis: false,
        }
    }
}

// ─── Phase state machine ─────────────────────────────────────────

/// Where a request is in its lifecycle.
///
/// `Aborted` is reachable from any capturing state. `Passthrough` is the
/// disabled fast path and is never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPhase {
    NotStarted,
    Passthrough,
    QueryStarted,
    Parsed,
    Validated,
    Executing,
    Done,
    Aborted,
}

impl QueryPhase {
    /// No more data will be written once a request is here.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

/// The reference pair read once at query start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryStart {
    pub wall: DateTime<Utc>,
    pub monotonic: MonotonicTime,
}

/// Duration of one phase plus how long after query start it began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTiming {
    pub duration: Duration,
    pub offset: Duration,
}

struct PhaseState {
    phase: QueryPhase,
    parsing: Option<PhaseTiming>,
    validation: Option<PhaseTiming>,
    summary: Option<StructuralSummary>,
}

// ─── RequestContext ──────────────────────────────────────────────

/// Everything captured for one request.
///
/// A cheap handle: clones share the same request, so a lazy field can be
/// moved into a spawned task and still append to it. Phase data is written
/// sequentially by [`PhaseInstrumentation`]; the two field collections take
/// concurrent appends from [`FieldResolutionTracer`]. After `Done` or
/// `Aborted` the collections are sealed, so repeated reads return the same
/// data.
///
/// [`PhaseInstrumentation`]: crate::phase::PhaseInstrumentation
/// [`FieldResolutionTracer`]: crate::tracer::FieldResolutionTracer
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    request_id: Uuid,
    flags: Mutex<RequestFlags>,
    capture: OnceLock<bool>,
    query_start: OnceLock<QueryStart>,
    state: Mutex<PhaseState>,
    inline_fields: Mutex<Vec<FieldTiming>>,
    lazy_fields: Mutex<Vec<FieldTiming>>,
    sealed: AtomicBool,
}

impl RequestContext {
    pub fn new(flags: RequestFlags) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                request_id: Uuid::new_v4(),
                flags: Mutex::new(flags),
                capture: OnceLock::new(),
                query_start: OnceLock::new(),
                state: Mutex::new(PhaseState {
                    phase: QueryPhase::NotStarted,
                    parsing: None,
                    validation: None,
                    summary: None,
                }),
                inline_fields: Mutex::new(Vec::new()),
                lazy_fields: Mutex::new(Vec::new()),
                sealed: AtomicBool::new(false),
            }),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.inner.request_id
    }

    /// Ask for (or decline) timing capture. Has no effect once the query
    /// has started: the decision taken at query start is final.
    pub fn request_capture(&self, enabled: bool) {
        self.inner.flags.lock().capture_timings = Some(enabled);
    }

    pub fn set_skip_analysis(&self, skip: bool) {
        self.inner.flags.lock().skip_analysis = skip;
    }

    pub fn flags(&self) -> RequestFlags {
        *self.inner.flags.lock()
    }

    /// True once capture was switched on at query start.
    #[inline]
    pub fn is_capturing(&self) -> bool {
        matches!(self.inner.capture.get(), Some(true))
    }

    pub fn phase(&self) -> QueryPhase {
        self.inner.state.lock().phase
    }

    pub fn query_start(&self) -> Option<QueryStart> {
        self.inner.query_start.get().copied()
    }

    pub fn query_start_monotonic(&self) -> Option<MonotonicTime> {
        self.inner.query_start.get().map(|s| s.monotonic)
    }

    pub fn parsing(&self) -> Option<PhaseTiming> {
        self.inner.state.lock().parsing
    }

    pub fn validation(&self) -> Option<PhaseTiming> {
        self.inner.state.lock().validation
    }

    pub fn structural_summary(&self) -> Option<StructuralSummary> {
        self.inner.state.lock().summary.clone()
    }

    /// Inline field records in append (completion) order.
    pub fn inline_field_timings(&self) -> Vec<FieldTiming> {
        self.inner.inline_fields.lock().clone()
    }

    /// Lazy field records in append (settlement) order.
    pub fn lazy_field_timings(&self) -> Vec<FieldTiming> {
        self.inner.lazy_fields.lock().clone()
    }

    /// Snapshot everything for an emitter.
    pub fn report(&self) -> TimingReport {
        TimingReport::from_context(self)
    }

    // ── Writers (crate-internal) ────────────────────────────────

    /// Freeze the capture decision. Returns `None` if it was already taken.
    pub(crate) fn decide_capture(&self, enabled: bool) -> Option<bool> {
        self.inner.capture.set(enabled).ok().map(|()| enabled)
    }

    pub(crate) fn mark_query_started(&self, start: QueryStart) {
        // Only the first reading counts; it anchors every offset.
        let _ = self.inner.query_start.set(start);
        self.inner.state.lock().phase = QueryPhase::QueryStarted;
    }

    pub(crate) fn mark_passthrough(&self) {
        self.inner.state.lock().phase = QueryPhase::Passthrough;
    }

    /// Move `from -> to` if the request is currently in `from`.
    pub(crate) fn transition(&self, from: QueryPhase, to: QueryPhase) -> bool {
        let mut state = self.inner.state.lock();
        if state.phase != from {
            return false;
        }
        state.phase = to;
        true
    }

    /// Store the parse timing and move to `Parsed`. Returns false, leaving
    /// the request untouched, unless it is still in `QueryStarted`.
    pub(crate) fn record_parsing(&self, timing: PhaseTiming) -> bool {
        let mut state = self.inner.state.lock();
        if state.phase != QueryPhase::QueryStarted {
            return false;
        }
        state.parsing = Some(timing);
        state.phase = QueryPhase::Parsed;
        true
    }

    /// Store the validation timing and move to `Validated`. Returns false
    /// unless the request is still in `Parsed`.
    pub(crate) fn record_validation(&self, timing: PhaseTiming) -> bool {
        let mut state = self.inner.state.lock();
        if state.phase != QueryPhase::Parsed {
            return false;
        }
        state.validation = Some(timing);
        state.phase = QueryPhase::Validated;
        true
    }

    /// Store the summary unless one is already attached.
    pub(crate) fn attach_summary(&self, summary: StructuralSummary) -> bool {
        let mut state = self.inner.state.lock();
        if state.summary.is_some() || state.phase.is_terminal() {
            return false;
        }
        state.summary = Some(summary);
        true
    }

    /// Append one field record. Returns false if the request already
    /// finished and the record was dropped.
    pub(crate) fn push_field(&self, timing: FieldTiming) -> bool {
        let mut fields = match timing.kind {
            FieldKind::Inline => self.inner.inline_fields.lock(),
            FieldKind::Lazy => self.inner.lazy_fields.lock(),
        };
        // Checked under the collection lock so `seal` cannot interleave.
        if self.inner.sealed.load(Ordering::Acquire) {
            return false;
        }
        fields.push(timing);
        true
    }

    /// Enter a terminal phase and stop accepting field records. Returns the
    /// phase the request ended in.
    pub(crate) fn seal(&self, terminal: QueryPhase) -> QueryPhase {
        let ended = {
            let mut state = self.inner.state.lock();
            match state.phase {
                QueryPhase::Passthrough | QueryPhase::NotStarted => state.phase,
                QueryPhase::Done | QueryPhase::Aborted => state.phase,
                _ => {
                    state.phase = terminal;
                    terminal
                }
            }
        };

        let _inline = self.inner.inline_fields.lock();
        let _lazy = self.inner.lazy_fields.lock();
        self.inner.sealed.store(true, Ordering::Release);
        ended
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(RequestFlags::default())
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.inner.request_id)
            .field("capturing", &self.is_capturing())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
