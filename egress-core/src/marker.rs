use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Opaque version token reported by the API as `lastModified`.
///
/// The API emits either epoch numbers or timestamp/revision strings, so both
/// are accepted and kept verbatim when written back to tracking state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VersionMarker {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl VersionMarker {
    /// Compares two markers using their natural ordering.
    ///
    /// Numbers compare numerically. Strings compare as instants when both
    /// parse as RFC 3339, otherwise lexicographically. A number and a string
    /// are incomparable and yield `None`.
    pub fn compare(&self, other: &VersionMarker) -> Option<Ordering> {
        match (self, other) {
            (VersionMarker::Integer(a), VersionMarker::Integer(b)) => Some(a.cmp(b)),
            (VersionMarker::Text(a), VersionMarker::Text(b)) => {
                match (parse_timestamp(a), parse_timestamp(b)) {
                    (Some(a), Some(b)) => Some(a.cmp(&b)),
                    _ => Some(a.cmp(b)),
                }
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    /// True when `self` denotes a later version than `recorded`.
    ///
    /// Incomparable markers count as newer unless their textual forms are
    /// equal, so `5` and `"5"` are the same version but any other change in
    /// marker format re-transfers the file.
    pub fn is_newer_than(&self, recorded: &VersionMarker) -> bool {
        match self.compare(recorded) {
            Some(order) => order == Ordering::Greater,
            None => self.to_string() != recorded.to_string(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            VersionMarker::Integer(v) => Some(*v as f64),
            VersionMarker::Float(v) => Some(*v),
            VersionMarker::Text(_) => None,
        }
    }
}

impl fmt::Display for VersionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionMarker::Integer(v) => write!(f, "{v}"),
            VersionMarker::Float(v) => write!(f, "{v}"),
            VersionMarker::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for VersionMarker {
    fn from(value: &str) -> Self {
        VersionMarker::Text(value.to_string())
    }
}

impl From<i64> for VersionMarker {
    fn from(value: i64) -> Self {
        VersionMarker::Integer(value)
    }
}

fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).ok()
}
