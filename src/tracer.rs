use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use pin_project_lite::pin_project;
use tracing::{debug, trace, warn};

use crate::clock::{Clock, MonotonicTime};
use crate::config::TimingsConfig;
use crate::context::{FieldKind, FieldPath, FieldTiming, QueryPhase, RequestContext};
use crate::report::as_us;
use crate::timed::TimedResult;

// ─── Resolver results ────────────────────────────────────────────

/// What a field resolver handed back: the value itself, or a deferred value
/// that settles later.
#[derive(Debug)]
pub enum Resolution<T, F> {
    Immediate(T),
    Deferred(F),
}

/// A traced resolution, mirroring [`Resolution`].
#[derive(Debug)]
pub enum Traced<T, F> {
    Ready(T),
    Pending(TracedLazy<F>),
}

impl<T, E, F> Traced<T, F>
where
    F: Future<Output = Result<T, E>>,
{
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Wait for the value, whichever way it arrives.
    pub async fn value(self) -> Result<T, E> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::Pending(lazy) => lazy.await,
        }
    }
}

// ─── Tracer ──────────────────────────────────────────────────────

/// Times every field resolution and files the record as inline or lazy.
///
/// Inline fields are recorded as soon as the resolver returns. For deferred
/// values the time to schedule is thrown away; the record is written when
/// the value settles and spans from the resolver call to settlement. A
/// resolver error, a deferred error, or dropping the deferred value before
/// it settles all leave no record for that field.
#[derive(Clone)]
pub struct FieldResolutionTracer {
    clock: Arc<dyn Clock>,
    config: Arc<TimingsConfig>,
}

impl FieldResolutionTracer {
    pub fn new(clock: Arc<dyn Clock>, config: Arc<TimingsConfig>) -> Self {
        Self { clock, config }
    }

    #[inline]
    fn active(&self, ctx: &RequestContext) -> bool {
        ctx.is_capturing() && self.config.capture_field_timings
    }

    /// Trace one resolver call at `path`.
    ///
    /// The resolver's error comes back unchanged and nothing is recorded
    /// for it; sibling fields are unaffected.
    pub fn trace<T, E, F, R>(
        &self,
        ctx: &RequestContext,
        path: FieldPath,
        resolve: R,
    ) -> Result<Traced<T, F>, E>
    where
        R: FnOnce() -> Result<Resolution<T, F>, E>,
    {
        if !self.active(ctx) {
            return resolve().map(|resolution| match resolution {
                Resolution::Immediate(value) => Traced::Ready(value),
                Resolution::Deferred(fut) => Traced::Pending(TracedLazy::untraced(fut)),
            });
        }

        let reference = self.start_field(ctx);
        let timed = TimedResult::try_measure(self.clock.as_ref(), reference, resolve)?;

        match timed.result {
            Resolution::Immediate(value) => {
                self.record_inline(ctx, path, timed.duration, timed.time_since_query_start);
                Ok(Traced::Ready(value))
            }
            Resolution::Deferred(fut) => Ok(Traced::Pending(TracedLazy {
                inner: fut,
                probe: Some(self.probe(ctx, path, timed.start_offset, reference)),
            })),
        }
    }

    /// Trace a resolver that always answers synchronously.
    pub fn trace_sync<T, E, R>(&self, ctx: &RequestContext, path: FieldPath, resolve: R) -> Result<T, E>
    where
        R: FnOnce() -> Result<T, E>,
    {
        if !self.active(ctx) {
            return resolve();
        }

        let reference = self.start_field(ctx);
        let timed = TimedResult::try_measure(self.clock.as_ref(), reference, resolve)?;
        self.record_inline(ctx, path, timed.duration, timed.time_since_query_start);
        Ok(timed.result)
    }

    /// Trace a resolver that is itself a future: the field is lazy and its
    /// timing runs from now until the future settles.
    ///
    /// The returned future holds its own handle on `ctx`, so it can be
    /// spawned onto another task.
    pub fn trace_deferred<F>(&self, ctx: &RequestContext, path: FieldPath, fut: F) -> TracedLazy<F> {
        if !self.active(ctx) {
            return TracedLazy::untraced(fut);
        }

        let reference = self.start_field(ctx);
        let start = self.clock.now_monotonic();
        TracedLazy {
            inner: fut,
            probe: Some(self.probe(ctx, path, start, reference)),
        }
    }

    /// Returns the query start reading every field offset is taken from.
    fn start_field(&self, ctx: &RequestContext) -> Option<MonotonicTime> {
        // The first traced field marks the start of execution.
        ctx.transition(QueryPhase::Validated, QueryPhase::Executing);
        ctx.query_start_monotonic()
    }

    fn record_inline(
        &self,
        ctx: &RequestContext,
        path: FieldPath,
        duration: Duration,
        since_query_start: Option<Duration>,
    ) {
        append(
            ctx,
            self.config.slow_field_threshold(),
            FieldTiming {
                path,
                duration,
                offset: since_query_start.unwrap_or_default(),
                kind: FieldKind::Inline,
            },
        );
    }

    fn probe(
        &self,
        ctx: &RequestContext,
        path: FieldPath,
        start: MonotonicTime,
        reference: Option<MonotonicTime>,
    ) -> LazyProbe {
        LazyProbe {
            ctx: ctx.clone(),
            clock: self.clock.clone(),
            slow_threshold: self.config.slow_field_threshold(),
            path,
            start,
            reference,
        }
    }
}

impl std::fmt::Debug for FieldResolutionTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldResolutionTracer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ─── Lazy fields ─────────────────────────────────────────────────

/// Everything needed to close a lazy field's measurement on settlement.
struct LazyProbe {
    ctx: RequestContext,
    clock: Arc<dyn Clock>,
    slow_threshold: Option<Duration>,
    path: FieldPath,
    start: MonotonicTime,
    reference: Option<MonotonicTime>,
}

impl LazyProbe {
    fn settle(self) {
        let timed = TimedResult::settle(self.clock.as_ref(), self.reference, self.start, ());
        append(
            &self.ctx,
            self.slow_threshold,
            FieldTiming {
                path: self.path,
                duration: timed.duration,
                offset: timed.time_since_query_start.unwrap_or_default(),
                kind: FieldKind::Lazy,
            },
        );
    }
}

impl std::fmt::Debug for LazyProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyProbe")
            .field("path", &self.path)
            .field("start", &self.start)
            .finish_non_exhaustive()
    }
}

pin_project! {
    /// A deferred field value that records its lazy timing when it settles
    /// successfully.
    ///
    /// Dropping it before it settles (request cancelled or timed out)
    /// records nothing.
    #[derive(Debug)]
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    pub struct TracedLazy<F> {
        #[pin]
        inner: F,
        probe: Option<LazyProbe>,
    }

    impl<F> PinnedDrop for TracedLazy<F> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(probe) = this.probe.take() {
                debug!(
                    request_id = %probe.ctx.request_id(),
                    path = %probe.path,
                    "lazy field dropped before settling; no timing recorded"
                );
            }
        }
    }
}

impl<F> TracedLazy<F> {
    fn untraced(inner: F) -> Self {
        Self { inner, probe: None }
    }

    /// Whether settlement will produce a record.
    pub fn is_traced(&self) -> bool {
        self.probe.is_some()
    }

    pub fn path(&self) -> Option<&FieldPath> {
        self.probe.as_ref().map(|p| &p.path)
    }
}

impl<T, E, F> Future for TracedLazy<F>
where
    F: Future<Output = Result<T, E>>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let out = ready!(this.inner.poll(cx));

        if let Some(probe) = this.probe.take() {
            match &out {
                Ok(_) => probe.settle(),
                Err(_) => trace!(
                    request_id = %probe.ctx.request_id(),
                    path = %probe.path,
                    "lazy field failed; no timing recorded"
                ),
            }
        }
        Poll::Ready(out)
    }
}

// ─── Recording ───────────────────────────────────────────────────

fn append(ctx: &RequestContext, slow_threshold: Option<Duration>, timing: FieldTiming) {
    if let Some(limit) = slow_threshold {
        if timing.duration > limit {
            warn!(
                request_id = %ctx.request_id(),
                path = %timing.path,
                kind = ?timing.kind,
                duration_ms = timing.duration.as_secs_f64() * 1000.0,
                "slow field"
            );
        }
    }

    trace!(
        request_id = %ctx.request_id(),
        path = %timing.path,
        kind = ?timing.kind,
        duration_us = as_us(timing.duration),
        offset_us = as_us(timing.offset),
        "field timed"
    );

    if !ctx.push_field(timing) {
        debug!(
            request_id = %ctx.request_id(),
            "request already finished; field timing dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::context::RequestFlags;
    use crate::phase::PhaseInstrumentation;

    struct Harness {
        clock: Arc<ManualClock>,
        phases: PhaseInstrumentation,
        fields: FieldResolutionTracer,
    }

    fn harness(config: TimingsConfig) -> Harness {
        let clock = Arc::new(ManualClock::new());
        let config = Arc::new(config);
        Harness {
            phases: PhaseInstrumentation::new(clock.clone(), config.clone()),
            fields: FieldResolutionTracer::new(clock.clone(), config),
            clock,
        }
    }

    fn started(h: &Harness) -> RequestContext {
        let ctx = RequestContext::new(RequestFlags::capture(true));
        h.phases.before_query(&ctx);
        ctx
    }

    fn path(name: &str) -> FieldPath {
        FieldPath::from_fields([name])
    }

    type Deferred = std::future::Ready<Result<u32, &'static str>>;

    #[test]
    fn inline_field_is_recorded_once() {
        let h = harness(TimingsConfig::default());
        let ctx = started(&h);
        h.clock.advance_ms(3);

        let traced = h
            .fields
            .trace(&ctx, path("a"), || {
                h.clock.advance_ms(1);
                Ok::<_, &str>(Resolution::<_, Deferred>::Immediate(7))
            })
            .unwrap();

        assert!(traced.is_ready());
        let inline = ctx.inline_field_timings();
        assert_eq!(inline.len(), 1);
        assert_eq!(inline[0].kind, FieldKind::Inline);
        assert_eq!(inline[0].duration, Duration::from_millis(1));
        assert_eq!(inline[0].offset, Duration::from_millis(3));
        assert!(ctx.lazy_field_timings().is_empty());
    }

    #[tokio::test]
    async fn lazy_field_is_timed_to_settlement() {
        let h = harness(TimingsConfig::default());
        let ctx = started(&h);
        h.clock.advance_ms(3);

        let clock = h.clock.clone();
        let traced = h
            .fields
            .trace(&ctx, path("b"), || {
                h.clock.advance_ms(1);
                Ok::<_, &str>(Resolution::<u32, _>::Deferred(async move {
                    clock.advance_ms(5);
                    Ok::<_, &str>(9)
                }))
            })
            .unwrap();

        assert!(!traced.is_ready());
        assert!(ctx.lazy_field_timings().is_empty(), "recorded before settling");

        assert_eq!(traced.value().await, Ok(9));

        let lazy = ctx.lazy_field_timings();
        assert_eq!(lazy.len(), 1);
        assert_eq!(lazy[0].kind, FieldKind::Lazy);
        assert_eq!(lazy[0].duration, Duration::from_millis(6));
        assert_eq!(lazy[0].offset, Duration::from_millis(3));
        assert!(ctx.inline_field_timings().is_empty());
    }

    #[test]
    fn resolver_error_leaves_no_record() {
        let h = harness(TimingsConfig::default());
        let ctx = started(&h);

        let failed = h.fields.trace_sync(&ctx, path("broken"), || Err::<u32, _>("boom"));
        let ok = h.fields.trace_sync(&ctx, path("sibling"), || Ok::<_, &str>(1));

        assert_eq!(failed, Err("boom"));
        assert_eq!(ok, Ok(1));
        let inline = ctx.inline_field_timings();
        assert_eq!(inline.len(), 1);
        assert_eq!(inline[0].path, path("sibling"));
        assert_ne!(ctx.phase(), QueryPhase::Aborted);
    }

    #[tokio::test]
    async fn deferred_error_leaves_no_record() {
        let h = harness(TimingsConfig::default());
        let ctx = started(&h);

        let out = h
            .fields
            .trace_deferred(&ctx, path("b"), async { Err::<u32, _>("lost") })
            .await;

        assert_eq!(out, Err("lost"));
        assert!(ctx.lazy_field_timings().is_empty());
    }

    #[test]
    fn dropped_lazy_field_leaves_no_record() {
        let h = harness(TimingsConfig::default());
        let ctx = started(&h);

        let lazy = h
            .fields
            .trace_deferred(&ctx, path("b"), std::future::pending::<Result<(), ()>>());
        assert!(lazy.is_traced());
        assert_eq!(lazy.path(), Some(&path("b")));
        drop(lazy);

        assert!(ctx.lazy_field_timings().is_empty());
    }

    #[tokio::test]
    async fn settlement_after_finish_is_dropped() {
        let h = harness(TimingsConfig::default());
        let ctx = started(&h);

        let lazy = h
            .fields
            .trace_deferred(&ctx, path("late"), async { Ok::<_, ()>(()) });
        let before = h.phases.finish(&ctx);
        lazy.await.unwrap();

        assert!(ctx.lazy_field_timings().is_empty());
        assert_eq!(before, ctx.report());
    }

    #[tokio::test]
    async fn disabled_request_passes_values_through() {
        let h = harness(TimingsConfig::default());
        let ctx = RequestContext::new(RequestFlags::capture(false));
        h.phases.before_query(&ctx);

        let v = h.fields.trace_sync(&ctx, path("a"), || Ok::<_, ()>(1));
        let lazy = h.fields.trace_deferred(&ctx, path("b"), async { Ok::<_, ()>(2) });
        assert!(!lazy.is_traced());

        assert_eq!(v, Ok(1));
        assert_eq!(lazy.await, Ok(2));
        assert!(ctx.inline_field_timings().is_empty());
        assert!(ctx.lazy_field_timings().is_empty());
    }

    #[test]
    fn field_capture_can_be_switched_off() {
        let h = harness(TimingsConfig {
            capture_field_timings: false,
            ..TimingsConfig::default()
        });
        let ctx = started(&h);

        let v = h.fields.trace_sync(&ctx, path("a"), || Ok::<_, ()>(1));

        assert_eq!(v, Ok(1));
        assert!(ctx.inline_field_timings().is_empty());
        assert!(ctx.query_start().is_some());
    }

    #[test]
    fn first_field_moves_request_to_executing() {
        let h = harness(TimingsConfig::default());
        let ctx = started(&h);
        let _: Result<(), ()> = h.phases.parse(&ctx, || Ok(()));
        let _: Result<(), ()> = h.phases.validate(&ctx, || Ok(()));
        assert_eq!(ctx.phase(), QueryPhase::Validated);

        let _ = h.fields.trace_sync(&ctx, path("a"), || Ok::<_, ()>(()));
        assert_eq!(ctx.phase(), QueryPhase::Executing);
    }

    #[tokio::test]
    async fn spawned_lazy_field_is_recorded() {
        let h = harness(TimingsConfig::default());
        let ctx = started(&h);

        let clock = h.clock.clone();
        let lazy = h.fields.trace_deferred(&ctx, path("remote"), async move {
            tokio::task::yield_now().await;
            clock.advance_ms(4);
            Ok::<_, ()>("done")
        });
        let out = tokio::spawn(lazy).await.unwrap();

        assert_eq!(out, Ok("done"));
        let lazy = ctx.lazy_field_timings();
        assert_eq!(lazy.len(), 1);
        assert_eq!(lazy[0].path, path("remote"));
        assert_eq!(lazy[0].duration, Duration::from_millis(4));
    }

    /// Collects formatted log lines.
    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    #[test]
    fn slow_field_warns_and_is_still_recorded() {
        let h = harness(TimingsConfig {
            slow_field_threshold_ms: Some(5),
            ..TimingsConfig::default()
        });
        let ctx = started(&h);

        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let _ = h.fields.trace_sync(&ctx, path("quick"), || {
                h.clock.advance_ms(5);
                Ok::<_, ()>(())
            });
            let _ = h.fields.trace_sync(&ctx, path("sluggish"), || {
                h.clock.advance_ms(6);
                Ok::<_, ()>(())
            });
        });

        let text = logs.text();
        assert_eq!(text.matches("slow field").count(), 1, "{text}");
        assert!(text.contains("sluggish"), "{text}");
        assert!(!text.contains("quick"), "{text}");

        let inline = ctx.inline_field_timings();
        assert_eq!(inline.len(), 2);
        assert_eq!(inline[1].path, path("sluggish"));
        assert_eq!(inline[1].duration, Duration::from_millis(6));
    }

    #[test]
    fn concurrent_appends_are_not_lost() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let config = Arc::new(TimingsConfig::default());
        let phases = PhaseInstrumentation::new(clock.clone(), config.clone());
        let fields = FieldResolutionTracer::new(clock, config);
        let ctx = RequestContext::new(RequestFlags::capture(true));
        phases.before_query(&ctx);

        std::thread::scope(|s| {
            for worker in 0..8 {
                let (ctx, fields) = (&ctx, &fields);
                s.spawn(move || {
                    for i in 0..250 {
                        let p = FieldPath::root().field("items").index(worker * 250 + i);
                        let _ = fields.trace_sync(ctx, p, || Ok::<_, ()>(i));
                    }
                });
            }
        });

        let inline = ctx.inline_field_timings();
        assert_eq!(inline.len(), 2_000);
        let mut indices: Vec<_> = inline
            .iter()
            .map(|t| t.path.segments()[1].clone())
            .collect();
        indices.sort_by_key(|seg| match seg {
            crate::context::PathSegment::Index(i) => *i,
            crate::context::PathSegment::Field(_) => usize::MAX,
        });
        indices.dedup();
        assert_eq!(indices.len(), 2_000);
    }
}
