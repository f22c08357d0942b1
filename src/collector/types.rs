//! Sample types produced by sensor sources.
//!
//! A sample is a single reading of one physiological metric. Samples are
//! immutable once created and only ever come from a [`SampleSource`] or
//! test fixtures.
//!
//! [`SampleSource`]: crate::collector::SampleSource

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SourceError;

/// A single physiological reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Opaque identifier
    #[serde(default = "new_sample_id")]
    pub id: String,
    /// Reading value in the metric's unit
    pub value: f64,
    /// When the reading was taken
    pub timestamp: DateTime<Utc>,
}

fn new_sample_id() -> String {
    Uuid::new_v4().to_string()
}

impl Sample {
    /// Create a sample with a fresh identifier.
    pub fn new(value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: new_sample_id(),
            value,
            timestamp,
        }
    }

    /// Create a sample stamped with the current time.
    pub fn now(value: f64) -> Self {
        Self::new(value, Utc::now())
    }
}

/// The metrics the triage pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Heart rate in beats per minute
    HeartRate,
    /// Heart-rate variability (SDNN) in milliseconds
    Hrv,
    /// Step count
    Steps,
}

impl MetricKind {
    /// All supported kinds, in report order.
    pub const ALL: [MetricKind; 3] = [MetricKind::HeartRate, MetricKind::Hrv, MetricKind::Steps];

    /// Stable identifier used in sample files and logs.
    pub fn identifier(&self) -> &'static str {
        match self {
            MetricKind::HeartRate => "heart_rate",
            MetricKind::Hrv => "hrv",
            MetricKind::Steps => "steps",
        }
    }

    /// Display unit.
    pub fn unit(&self) -> &'static str {
        match self {
            MetricKind::HeartRate => "BPM",
            MetricKind::Hrv => "ms",
            MetricKind::Steps => "steps",
        }
    }

    /// Resolve a metric from its identifier.
    ///
    /// Unknown identifiers are an explicit `NotSupported` error rather than
    /// a silently assumed default.
    pub fn from_identifier(identifier: &str) -> Result<Self, SourceError> {
        match identifier.trim().to_lowercase().as_str() {
            "heart_rate" | "heartrate" => Ok(MetricKind::HeartRate),
            "hrv" | "heart_rate_variability_sdnn" => Ok(MetricKind::Hrv),
            "steps" | "step_count" => Ok(MetricKind::Steps),
            other => Err(SourceError::NotSupported(other.to_string())),
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.identifier())
    }
}
