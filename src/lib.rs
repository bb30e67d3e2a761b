//! # graphql-timings
//!
//! Monotonic-clock timing capture for GraphQL query execution: request
//! start, parsing, validation, and every field resolution, inline or lazy.
//!
//! ## Flow
//!
//! ```text
//! before_query ─▶ parse ─▶ analyze ─▶ validate ─▶ fields… ─▶ finish
//!      │             │                   │           │          │
//!      └─────────────┴──── RequestContext ◀──────────┘          ▼
//!                                                         TimingReport
//! ```
//!
//! The host engine owns one [`RequestContext`] per request and calls the
//! hooks on [`PhaseInstrumentation`] and [`FieldResolutionTracer`]. Once
//! the request is finished an emitter reads the [`TimingReport`]. A request
//! that did not opt in costs no clock reads at all.

pub mod analyzer;
pub mod ast;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod phase;
pub mod report;
pub mod timed;
pub mod tracer;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

pub use analyzer::{StructuralAnalyzer, StructuralSummary};
pub use clock::{Clock, ManualClock, MonotonicTime, SystemClock};
pub use config::TimingsConfig;
pub use context::{
    FieldKind, FieldPath, FieldTiming, PathSegment, PhaseTiming, QueryPhase, QueryStart,
    RequestContext, RequestFlags,
};
pub use error::TimingsError;
pub use phase::PhaseInstrumentation;
pub use report::TimingReport;
pub use timed::TimedResult;
pub use tracer::{FieldResolutionTracer, Resolution, Traced, TracedLazy};

/// Phase hooks and field tracer sharing one clock and configuration.
#[derive(Debug, Clone)]
pub struct Instrumentation {
    pub phases: PhaseInstrumentation,
    pub fields: FieldResolutionTracer,
}

impl Instrumentation {
    /// Instrumentation on the system clocks.
    pub fn new(config: TimingsConfig) -> Self {
        Self::with_clock(Arc::new(SystemClock), config)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, config: TimingsConfig) -> Self {
        let config = Arc::new(config);
        Self {
            phases: PhaseInstrumentation::new(clock.clone(), config.clone()),
            fields: FieldResolutionTracer::new(clock, config),
        }
    }

    /// Build from a JSON configuration document.
    pub fn from_json_str(raw: &str) -> Result<Self, TimingsError> {
        Ok(Self::new(TimingsConfig::from_json_str(raw)?))
    }

    /// Create a context for a new request and run the query-start hook.
    pub fn start_request(&self, flags: RequestFlags) -> RequestContext {
        let ctx = RequestContext::new(flags);
        self.phases.before_query(&ctx);
        ctx
    }
}

/// Install a global `tracing` subscriber.
///
/// `LOG_FORMAT=json` selects JSON lines; anything else prints human-readable
/// output. The level filter comes from `RUST_LOG`.
///
/// # Errors
///
/// Returns [`TimingsError::Tracing`] if a global subscriber is already set.
pub fn init_tracing() -> Result<(), TimingsError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| TimingsError::Tracing(e.to_string()))
}
