use std::time::Duration;

use graphql_timings::ast::{Definition, Document, Field, OperationDefinition, OperationType, Selection, SelectionSet};
use graphql_timings::{
    FieldKind, FieldPath, Instrumentation, RequestFlags, Resolution, Traced, TimingReport,
    TimingsConfig,
};

/// The toy schema: `fast` answers inline, `slow` answers after a delay.
const KNOWN_FIELDS: &[&str] = &["fast", "slow"];

const QUERY: &str = "{ fast slow }";

#[tokio::main]
async fn main() {
    if let Err(e) = graphql_timings::init_tracing() {
        eprintln!("⚠️  {e}");
    }

    println!();
    println!("╔══════════════════════════════════════════════════╗");
    println!("║   ⏱   GRAPHQL QUERY TIMINGS                      ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();

    // ── 1. Configuration ─────────────────────────────────────────
    let config = match std::env::var("TIMINGS_CONFIG") {
        Ok(raw) => TimingsConfig::from_json_str(&raw).unwrap_or_else(|e| {
            eprintln!("❌ {e}");
            std::process::exit(1);
        }),
        Err(_) => TimingsConfig {
            enabled_by_default: true,
            slow_field_threshold_ms: Some(4),
            ..TimingsConfig::default()
        },
    };
    let timings = Instrumentation::new(config);

    // ── 2. Query start ───────────────────────────────────────────
    let ctx = timings.start_request(RequestFlags::default());
    println!("🔎 Query {QUERY}  (request {})", ctx.request_id());

    // ── 3. Parse, analyze, validate ──────────────────────────────
    let doc = match timings.phases.parse(&ctx, || parse(QUERY)) {
        Ok(doc) => doc,
        Err(e) => return fail(&timings, &ctx, "parse", &e),
    };
    timings.phases.analyze(&ctx, &doc);
    if let Err(e) = timings.phases.validate(&ctx, || validate(&doc)) {
        return fail(&timings, &ctx, "validate", &e);
    }

    // ── 4. Execute ───────────────────────────────────────────────
    timings.phases.begin_execution(&ctx);
    let mut pending = Vec::new();
    for name in top_level_fields(&doc) {
        let path = FieldPath::from_fields([name.as_str()]);
        let traced = timings.fields.trace(&ctx, path, || resolve(&name));
        match traced {
            Ok(traced) => pending.push((name, traced)),
            Err(e) => println!("  field {name} failed: {e}"),
        }
    }
    for (name, traced) in pending {
        let lazy = matches!(traced, Traced::Pending(_));
        match traced.value().await {
            Ok(value) => println!("  {name:<6} = {value:?}{}", if lazy { "  (lazy)" } else { "" }),
            Err(e) => println!("  field {name} failed: {e}"),
        }
    }

    // ── 5. Report ────────────────────────────────────────────────
    let report = timings.phases.finish(&ctx);
    print_report(&report);
}

// ─── Toy host engine ─────────────────────────────────────────────

fn parse(src: &str) -> Result<Document, String> {
    let body = src
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| format!("expected a selection set, got {src:?}"))?;

    let selections = body
        .split_whitespace()
        .map(|name| Selection::Field(Field::new(name)))
        .collect();

    Ok(Document {
        definitions: vec![Definition::Operation(OperationDefinition {
            operation_type: OperationType::Query,
            name: None,
            selection_set: SelectionSet { selections },
        })],
    })
}

fn validate(doc: &Document) -> Result<(), String> {
    for name in top_level_fields(doc) {
        if !KNOWN_FIELDS.contains(&name.as_str()) {
            return Err(format!("unknown field {name:?} on Query"));
        }
    }
    Ok(())
}

fn top_level_fields(doc: &Document) -> Vec<String> {
    doc.operations()
        .flat_map(|op| op.selection_set.selections.iter())
        .filter_map(|sel| match sel {
            Selection::Field(field) => Some(field.response_key().to_owned()),
            _ => None,
        })
        .collect()
}

type FieldFuture = std::pin::Pin<Box<dyn std::future::Future<Output = Result<String, String>> + Send>>;

fn resolve(name: &str) -> Result<Resolution<String, FieldFuture>, String> {
    match name {
        "fast" => Ok(Resolution::Immediate("inline value".to_string())),
        "slow" => Ok(Resolution::Deferred(Box::pin(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok("settled value".to_string())
        }))),
        other => Err(format!("no resolver for {other:?}")),
    }
}

// ─── Output ──────────────────────────────────────────────────────

fn fail(timings: &Instrumentation, ctx: &graphql_timings::RequestContext, phase: &str, err: &str) {
    println!("  \x1b[31m{phase} failed\x1b[0m: {err}");
    print_report(&timings.phases.finish(ctx));
}

fn print_report(report: &TimingReport) {
    println!();
    if let (Some(d), Some(o)) = (report.parsing_duration_us, report.parsing_start_time_offset_us) {
        println!("  parse     {d:>7}μs  @ +{o}μs");
    }
    if let (Some(d), Some(o)) = (
        report.validation_duration_us,
        report.validation_start_time_offset_us,
    ) {
        println!("  validate  {d:>7}μs  @ +{o}μs");
    }
    for field in report.all_fields() {
        let colour = match field.kind {
            FieldKind::Inline => "\x1b[32m", // green
            FieldKind::Lazy => "\x1b[33m",   // yellow
        };
        println!(
            "  {colour}{:<6}\x1b[0m    {:>7}μs  @ +{}μs  {}",
            format!("{:?}", field.kind).to_lowercase(),
            field.duration.as_micros(),
            field.offset.as_micros(),
            field.path,
        );
    }

    println!();
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("❌ could not serialize report: {e}"),
    }
}
