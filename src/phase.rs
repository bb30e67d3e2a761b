use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::analyzer::StructuralAnalyzer;
use crate::ast::Document;
use crate::clock::Clock;
use crate::config::TimingsConfig;
use crate::context::{PhaseTiming, QueryPhase, QueryStart, RequestContext};
use crate::report::{as_us, TimingReport};
use crate::timed::TimedResult;

/// Brackets the request lifecycle: query start, parse, validate, and the
/// end of execution.
///
/// Every wrapping hook hands the host's own `Result` back untouched. On a
/// request that did not opt in, the hooks call straight through without
/// reading the clock.
#[derive(Clone)]
pub struct PhaseInstrumentation {
    clock: Arc<dyn Clock>,
    config: Arc<TimingsConfig>,
}

/// Which timed phase a wrapper is measuring.
#[derive(Debug, Clone, Copy)]
enum Phase {
    Parse,
    Validate,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Validate => "validate",
        }
    }

    /// State the request must be in for this phase to be timed.
    fn expects(self) -> QueryPhase {
        match self {
            Self::Parse => QueryPhase::QueryStarted,
            Self::Validate => QueryPhase::Parsed,
        }
    }
}

impl PhaseInstrumentation {
    pub fn new(clock: Arc<dyn Clock>, config: Arc<TimingsConfig>) -> Self {
        Self { clock, config }
    }

    /// Read the opt-in signal and, if capturing, the query start pair.
    ///
    /// The decision is taken exactly once per request; later changes to the
    /// request flags are ignored. Returns whether this request captures.
    pub fn before_query(&self, ctx: &RequestContext) -> bool {
        let flags = ctx.flags();
        let enabled = !flags.skip_analysis
            && flags
                .capture_timings
                .unwrap_or(self.config.enabled_by_default);

        match ctx.decide_capture(enabled) {
            None => {
                warn!(
                    request_id = %ctx.request_id(),
                    "query already started; keeping the first capture decision"
                );
                ctx.is_capturing()
            }
            Some(false) => {
                ctx.mark_passthrough();
                trace!(request_id = %ctx.request_id(), "timing capture disabled");
                false
            }
            Some(true) => {
                let start = QueryStart {
                    wall: self.clock.now_wall(),
                    monotonic: self.clock.now_monotonic(),
                };
                ctx.mark_query_started(start);
                debug!(
                    request_id = %ctx.request_id(),
                    query_start = %start.wall.to_rfc3339(),
                    "query started"
                );
                true
            }
        }
    }

    /// Time the parse step. On failure the request is aborted and the
    /// parse error returned as-is.
    pub fn parse<T, E, F>(&self, ctx: &RequestContext, parse: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.timed_phase(ctx, Phase::Parse, parse)
    }

    /// Time the validation step. Same abort policy as [`Self::parse`].
    pub fn validate<T, E, F>(&self, ctx: &RequestContext, validate: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.timed_phase(ctx, Phase::Validate, validate)
    }

    /// Attach a structural summary of the parsed document. Runs at most once
    /// per request, and only while capturing.
    pub fn analyze(&self, ctx: &RequestContext, doc: &Document) {
        if !ctx.is_capturing() || !self.config.analyze_structure {
            return;
        }
        match ctx.phase() {
            QueryPhase::Parsed | QueryPhase::Validated | QueryPhase::Executing => {}
            other => {
                debug!(
                    request_id = %ctx.request_id(),
                    phase = ?other,
                    "no parsed document to analyze"
                );
                return;
            }
        }

        let summary = StructuralAnalyzer::analyze(doc);
        let fields = summary.field_count;
        if ctx.attach_summary(summary) {
            trace!(request_id = %ctx.request_id(), fields, "structure analyzed");
        } else {
            debug!(request_id = %ctx.request_id(), "structure already analyzed");
        }
    }

    /// Mark the start of execution. Field tracing does this implicitly on
    /// the first traced field.
    pub fn begin_execution(&self, ctx: &RequestContext) {
        if !ctx.is_capturing() {
            return;
        }
        if !ctx.transition(QueryPhase::Validated, QueryPhase::Executing)
            && ctx.phase() != QueryPhase::Executing
        {
            warn!(
                request_id = %ctx.request_id(),
                phase = ?ctx.phase(),
                "execution started before validation completed"
            );
        }
    }

    /// Record that execution failed outright. Records already captured
    /// stay readable; nothing further is appended.
    pub fn abort(&self, ctx: &RequestContext) -> TimingReport {
        let ended = ctx.seal(QueryPhase::Aborted);
        debug!(request_id = %ctx.request_id(), phase = ?ended, "request aborted");
        ctx.report()
    }

    /// Close the request and return the finished snapshot.
    pub fn finish(&self, ctx: &RequestContext) -> TimingReport {
        let ended = ctx.seal(QueryPhase::Done);
        debug!(
            request_id = %ctx.request_id(),
            phase = ?ended,
            inline_fields = ctx.inline_field_timings().len(),
            lazy_fields = ctx.lazy_field_timings().len(),
            "request finished"
        );
        ctx.report()
    }

    fn timed_phase<T, E, F>(&self, ctx: &RequestContext, phase: Phase, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if !ctx.is_capturing() {
            return work();
        }

        let current = ctx.phase();
        if current != phase.expects() {
            warn!(
                request_id = %ctx.request_id(),
                phase = phase.name(),
                state = ?current,
                "phase hook out of order; not timed"
            );
            return work();
        }

        let reference = ctx.query_start_monotonic();
        match TimedResult::try_measure(self.clock.as_ref(), reference, work) {
            Ok(timed) => {
                let timing = PhaseTiming {
                    duration: timed.duration,
                    offset: timed.time_since_query_start.unwrap_or_default(),
                };
                let recorded = match phase {
                    Phase::Parse => ctx.record_parsing(timing),
                    Phase::Validate => ctx.record_validation(timing),
                };
                if !recorded {
                    debug!(
                        request_id = %ctx.request_id(),
                        phase = phase.name(),
                        state = ?ctx.phase(),
                        "request moved on while the phase ran; timing dropped"
                    );
                    return Ok(timed.result);
                }
                trace!(
                    request_id = %ctx.request_id(),
                    phase = phase.name(),
                    duration_us = as_us(timing.duration),
                    offset_us = as_us(timing.offset),
                    "phase timed"
                );
                Ok(timed.result)
            }
            Err(err) => {
                ctx.seal(QueryPhase::Aborted);
                debug!(
                    request_id = %ctx.request_id(),
                    phase = phase.name(),
                    "phase failed; request aborted"
                );
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for PhaseInstrumentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseInstrumentation")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
