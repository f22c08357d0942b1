//! Sensor sources for the triage pipeline.
//!
//! The physiological data source is an external collaborator. This module
//! defines the interface the pipeline needs from it, plus two concrete
//! sources: a JSON sample file and a noop source that never has data.

pub mod file;
pub mod noop;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

// Re-export commonly used types
pub use file::{FileSource, SampleFile};
pub use noop::NoopSource;
pub use types::{MetricKind, Sample};

/// A source of physiological samples.
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Fetch samples of one metric taken within `[start, end)`.
    ///
    /// Results are not required to be time-ordered. An empty result is a
    /// normal outcome.
    async fn fetch_samples(
        &self,
        kind: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Sample>, SourceError>;
}

/// Errors that can occur while fetching samples.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    /// The user has not granted read access
    AuthorizationDenied,
    /// The metric is not available from this source
    NotSupported(String),
    /// The source could not be reached or read
    Unavailable(String),
    /// The source returned data that could not be decoded
    Parse(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::AuthorizationDenied => write!(f, "Sensor authorization denied"),
            SourceError::NotSupported(kind) => write!(f, "Metric not supported: {kind}"),
            SourceError::Unavailable(e) => write!(f, "Sensor source unavailable: {e}"),
            SourceError::Parse(e) => write!(f, "Sensor data parse error: {e}"),
        }
    }
}

impl std::error::Error for SourceError {}
