//! # gneiss-types: Core types for Gneiss
//!
//! This crate contains the shared types used across the Gneiss audit sink:
//! - Event model ([`LogEvent`], [`Level`])
//! - Durability knobs ([`SyncMode`])
//! - Observability seam ([`MetricsRecorder`], [`NoopRecorder`], [`MemoryRecorder`])
//!
//! Events are immutable once accepted: the sink clones on transform and never
//! mutates a caller's event in place.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod metrics;

pub use metrics::{Label, MemoryRecorder, MetricSample, MetricsRecorder, NoopRecorder};

// ============================================================================
// Severity levels
// ============================================================================

/// Severity level of a log event.
///
/// Serialized as its integer value on the wire (`"level": 2`), matching the
/// payload format consumed by downstream archive tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

impl Level {
    /// Returns the wire value for this level.
    pub fn as_u8(self) -> u8 {
        match self {
            Level::Verbose => 0,
            Level::Debug => 1,
            Level::Information => 2,
            Level::Warning => 3,
            Level::Error => 4,
            Level::Fatal => 5,
        }
    }

    /// Parses a wire value back into a level.
    ///
    /// Returns `None` for bytes outside `0..=5`.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Level::Verbose),
            1 => Some(Level::Debug),
            2 => Some(Level::Information),
            3 => Some(Level::Warning),
            4 => Some(Level::Error),
            5 => Some(Level::Fatal),
            _ => None,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Level::Verbose => "Verbose",
            Level::Debug => "Debug",
            Level::Information => "Information",
            Level::Warning => "Warning",
            Level::Error => "Error",
            Level::Fatal => "Fatal",
        };
        write!(f, "{name}")
    }
}

impl Serialize for Level {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let byte = u8::deserialize(deserializer)?;
        Level::from_u8(byte)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid level value {byte}")))
    }
}

// ============================================================================
// Log events
// ============================================================================

/// A single structured log event accepted by the sink.
///
/// Properties use a sorted map so the canonical JSON encoding is stable;
/// the hash chain and signature chain both depend on byte-reproducible
/// serialization of the same event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Event timestamp, serialized as RFC3339 with nanosecond precision.
    pub timestamp: DateTime<Utc>,

    /// Severity level (integer on the wire).
    pub level: Level,

    /// Message template with `{Property}` holes, stored verbatim.
    #[serde(rename = "messageTemplate")]
    pub message_template: String,

    /// Structured properties captured with the event.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,

    /// Rendered exception text, if the event carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

impl LogEvent {
    /// Creates an event with the given level and template, timestamped now.
    pub fn new(level: Level, message_template: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message_template: message_template.into(),
            properties: BTreeMap::new(),
            exception: None,
        }
    }

    /// Creates an event with an explicit timestamp.
    pub fn at(timestamp: DateTime<Utc>, level: Level, message_template: impl Into<String>) -> Self {
        Self {
            timestamp,
            level,
            message_template: message_template.into(),
            properties: BTreeMap::new(),
            exception: None,
        }
    }

    /// Adds a property, consuming and returning the event (builder style).
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Attaches exception text.
    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    /// Timestamp as nanoseconds since the Unix epoch.
    ///
    /// Saturates at the i64 range boundary; audit events live comfortably
    /// within 1677–2262.
    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp
            .timestamp_nanos_opt()
            .unwrap_or(i64::MAX)
    }

    /// Timestamp rendered as RFC3339 with nanosecond precision.
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    /// Serializes the event to its canonical JSON byte form.
    ///
    /// Properties are emitted in sorted key order, so the same event always
    /// produces the same bytes. This is the form that gets hashed, signed,
    /// and written to the WAL payload.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decodes an event from its canonical JSON byte form.
    pub fn from_canonical_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

// ============================================================================
// Durability
// ============================================================================

/// When appended bytes are pushed to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// fsync after every write. Slowest, strongest.
    Immediate,
    /// The caller (typically a group committer) decides when to fsync.
    Batch,
    /// A background worker fsyncs on a fixed cadence.
    Interval(Duration),
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::Batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Level::Verbose, 0)]
    #[test_case(Level::Debug, 1)]
    #[test_case(Level::Information, 2)]
    #[test_case(Level::Warning, 3)]
    #[test_case(Level::Error, 4)]
    #[test_case(Level::Fatal, 5)]
    fn level_wire_values_roundtrip(level: Level, wire: u8) {
        assert_eq!(level.as_u8(), wire);
        assert_eq!(Level::from_u8(wire), Some(level));
    }

    #[test]
    fn level_rejects_unknown_byte() {
        assert_eq!(Level::from_u8(6), None);
    }

    #[test]
    fn event_json_uses_wire_field_names() {
        let event = LogEvent::new(Level::Information, "user {UserId} logged in")
            .with_property("UserId", "u-17");
        let json: Value = serde_json::from_slice(&event.to_canonical_json().unwrap()).unwrap();

        assert_eq!(json["level"], 2);
        assert_eq!(json["messageTemplate"], "user {UserId} logged in");
        assert_eq!(json["properties"]["UserId"], "u-17");
        assert!(json.get("exception").is_none());
    }

    #[test]
    fn canonical_json_is_stable_across_insertion_order() {
        let a = LogEvent::at(Utc::now(), Level::Information, "t")
            .with_property("zulu", 1)
            .with_property("alpha", 2);
        let mut b = LogEvent::at(a.timestamp, Level::Information, "t");
        b.properties.insert("alpha".into(), 2.into());
        b.properties.insert("zulu".into(), 1.into());

        assert_eq!(
            a.to_canonical_json().unwrap(),
            b.to_canonical_json().unwrap()
        );
    }

    #[test]
    fn canonical_json_roundtrips() {
        let event = LogEvent::new(Level::Error, "boom")
            .with_property("code", 500)
            .with_exception("stack trace here");
        let bytes = event.to_canonical_json().unwrap();
        let decoded = LogEvent::from_canonical_json(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn timestamp_rfc3339_keeps_nanos() {
        let event = LogEvent::new(Level::Debug, "t");
        let rendered = event.timestamp_rfc3339();
        // RFC3339 with nanosecond precision: fractional part is 9 digits.
        let frac = rendered.split('.').nth(1).unwrap();
        assert_eq!(frac.trim_end_matches('Z').len(), 9);
    }
}
