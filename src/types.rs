use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One decoded MIRAS notification.
///
/// Produced by [`crate::parse::decode`] and shared by both the live window and
/// the accumulation queue. Nothing in the pipeline mutates a sample after
/// construction; each buffer holds its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds since the link was established (not wall-clock time).
    pub timestamp: u64,
    /// Channel readings in payload order, usually 12 of them.
    ///
    /// Fields that failed to parse are `f64::NAN`; the channel count is not
    /// validated. NaN travels as JSON `null`.
    #[serde(with = "nan_as_null")]
    pub values: Vec<f64>,
}

impl Sample {
    pub fn new(timestamp: u64, values: Vec<f64>) -> Self {
        Self { timestamp, values }
    }

    /// `true` when every channel parsed to a number.
    pub fn is_well_formed(&self) -> bool {
        self.values.iter().all(|v| !v.is_nan())
    }
}

/// A group of samples written to the persistence sink as one document.
///
/// Built by the flush scheduler from a drained snapshot of the accumulation
/// queue and dropped once the sink call returns, whatever its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    /// Wall-clock creation time in milliseconds since the Unix epoch.
    pub batch_timestamp: i64,
    /// Samples in arrival order.
    pub samples: Vec<Sample>,
}

impl Batch {
    /// Stamp `samples` with `created_at` and return the batch together with
    /// its document key.
    pub fn new(created_at: DateTime<Utc>, samples: Vec<Sample>) -> (Self, String) {
        let batch = Self {
            batch_timestamp: created_at.timestamp_millis(),
            samples,
        };
        (batch, document_key(created_at))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// ISO-8601 document key with millisecond precision and a `Z` suffix,
/// e.g. `2026-10-14T09:30:00.123Z`.
///
/// Two batches created within the same millisecond collide; the second write
/// replaces the first.
pub fn document_key(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Link state as seen by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("Disconnected"),
            Self::Connected => f.write_str("Connected"),
        }
    }
}

/// Serde adapter mapping `f64::NAN` to `null` and back.
///
/// `serde_json` already writes non-finite floats as `null` but refuses to read
/// `null` into `f64`, which would make malformed samples unreadable.
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], ser: S) -> Result<S::Ok, S::Error> {
        ser.collect_seq(values.iter().map(|v| if v.is_nan() { None } else { Some(*v) }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<f64>, D::Error> {
        let raw = Vec::<Option<f64>>::deserialize(de)?;
        Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn document_key_matches_js_iso_string() {
        let at = Utc.timestamp_millis_opt(1_760_434_200_123).unwrap();
        assert_eq!(document_key(at), "2025-10-14T09:30:00.123Z");
    }

    #[test]
    fn batch_uses_one_instant_for_timestamp_and_key() {
        let at = Utc.timestamp_millis_opt(1_000).unwrap();
        let (batch, key) = Batch::new(at, vec![Sample::new(5, vec![1.0])]);
        assert_eq!(batch.batch_timestamp, 1_000);
        assert_eq!(key, "1970-01-01T00:00:01.000Z");
    }

    #[test]
    fn batch_json_uses_camel_case_fields() {
        let at = Utc.timestamp_millis_opt(42).unwrap();
        let (batch, _) = Batch::new(at, vec![Sample::new(7, vec![1.0, 2.0])]);
        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["batchTimestamp"], 42);
        assert_eq!(json["samples"][0]["timestamp"], 7);
        assert_eq!(json["samples"][0]["values"][1], 2.0);
    }

    #[test]
    fn nan_channels_survive_json() {
        let sample = Sample::new(3, vec![1.0, f64::NAN, 3.0]);
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, r#"{"timestamp":3,"values":[1.0,null,3.0]}"#);

        let back: Sample = serde_json::from_str(&json).unwrap();
        assert_eq!(back.timestamp, 3);
        assert_eq!(back.values[0], 1.0);
        assert!(back.values[1].is_nan());
        assert!(!back.is_well_formed());
    }

    #[test]
    fn state_defaults_to_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(!ConnectionState::default().is_connected());
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
    }
}
