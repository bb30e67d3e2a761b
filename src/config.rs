use std::time::Duration;

use serde::Deserialize;

use crate::error::TimingsError;

/// Instrumentation-wide settings. Per-request opt-in lives in
/// [`RequestFlags`](crate::context::RequestFlags).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimingsConfig {
    /// Capture timings when a request gives no opt-in signal.
    #[serde(default)]
    pub enabled_by_default: bool,

    /// Time individual field resolvers (phases are always timed).
    #[serde(default = "default_true")]
    pub capture_field_timings: bool,

    /// Run the structural analyzer on parsed documents.
    #[serde(default = "default_true")]
    pub analyze_structure: bool,

    /// Log a warning for any field slower than this.
    #[serde(default)]
    pub slow_field_threshold_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            enabled_by_default: false,
            capture_field_timings: true,
            analyze_structure: true,
            slow_field_threshold_ms: None,
        }
    }
}

impl TimingsConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(raw: &str) -> Result<Self, TimingsError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TimingsError> {
        if self.slow_field_threshold_ms == Some(0) {
            return Err(TimingsError::InvalidConfig(
                "slow_field_threshold_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn slow_field_threshold(&self) -> Option<Duration> {
        self.slow_field_threshold_ms.map(Duration::from_millis)
    }
}
