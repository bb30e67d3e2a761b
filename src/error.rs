use thiserror::Error;

/// Errors owned by this crate.
///
/// Host failures (parse, validation, resolver errors) never appear here:
/// they pass through the instrumentation hooks as the host's own error type.
#[derive(Error, Debug)]
pub enum TimingsError {
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration document could not be parsed.
    #[error("could not parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// The global tracing subscriber could not be installed.
    #[error("tracing init failed: {0}")]
    Tracing(String),
}
