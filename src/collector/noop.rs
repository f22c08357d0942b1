//! Noop sensor source.
//!
//! This exists so the agent can run where no physiological data source is
//! configured. Every fetch succeeds with no samples, which the triage engine
//! reports as a device issue.

use crate::collector::types::{MetricKind, Sample};
use crate::collector::{SampleSource, SourceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A source that never has any samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSource;

impl NoopSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SampleSource for NoopSource {
    async fn fetch_samples(
        &self,
        _kind: MetricKind,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<Sample>, SourceError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_noop_source_is_always_empty() {
        let source = NoopSource::new();
        let end = Utc::now();
        for kind in MetricKind::ALL {
            let samples = source
                .fetch_samples(kind, end - Duration::hours(1), end)
                .await
                .unwrap();
            assert!(samples.is_empty());
        }
    }
}
