use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::report::micros;

// ─── Field paths ─────────────────────────────────────────────────

/// One step in a response path: a field name (or alias) or a list index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Ordered path from the operation root to a field, as it appears in the
/// response, e.g. `users.0.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path made only of field names.
    pub fn from_fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            names
                .into_iter()
                .map(|n| PathSegment::Field(n.into()))
                .collect(),
        )
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.0.push(PathSegment::Field(name.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PathSegment::Index(index));
        self
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<PathSegment> for FieldPath {
    fn from_iter<I: IntoIterator<Item = PathSegment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match seg {
                PathSegment::Field(name) => f.write_str(name)?,
                PathSegment::Index(idx) => write!(f, "{idx}")?,
            }
        }
        Ok(())
    }
}

// ─── Field timing records ────────────────────────────────────────

/// How a field's value became available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// The resolver returned the value directly.
    Inline,
    /// The resolver returned a deferred value that settled later.
    Lazy,
}

/// One field's resolution timing. Created once its value is available and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldTiming {
    pub path: FieldPath,
    #[serde(rename = "duration_us", serialize_with = "micros")]
    pub duration: Duration,
    #[serde(rename = "offset_us", serialize_with = "micros")]
    pub offset: Duration,
    pub kind: FieldKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_displays_dot_joined() {
        let path = FieldPath::root().field("users").index(3).field("name");
        assert_eq!(path.to_string(), "users.3.name");
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn path_serializes_like_a_response_path() {
        let path = FieldPath::from_fields(["viewer", "repos"]).index(0);
        let json = serde_json::to_value(&path).unwrap();
        assert_eq!(json, serde_json::json!(["viewer", "repos", 0]));
    }

    #[test]
    fn timing_serializes_in_microseconds() {
        let timing = FieldTiming {
            path: FieldPath::from_fields(["a"]),
            duration: Duration::from_millis(1),
            offset: Duration::from_micros(3_250),
            kind: FieldKind::Lazy,
        };
        let json = serde_json::to_value(&timing).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "path": ["a"],
                "duration_us": 1000,
                "offset_us": 3250,
                "kind": "lazy",
            })
        );
    }
}
