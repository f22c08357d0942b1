//! JSON file sensor source.
//!
//! Reads samples exported by a companion app or wearable bridge from a single
//! JSON document:
//!
//! ```json
//! {
//!   "authorized": true,
//!   "heart_rate": [{ "value": 72.0, "timestamp": "2024-01-22T10:00:00Z" }],
//!   "hrv": [],
//!   "steps": []
//! }
//! ```
//!
//! A missing file means no data yet. `"authorized": false` models a user who
//! denied read access.

use crate::collector::types::{MetricKind, Sample};
use crate::collector::{SampleSource, SourceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// On-disk sample document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleFile {
    /// Whether the user granted read access
    #[serde(default = "default_authorized")]
    pub authorized: bool,
    #[serde(default)]
    pub heart_rate: Vec<Sample>,
    #[serde(default)]
    pub hrv: Vec<Sample>,
    #[serde(default)]
    pub steps: Vec<Sample>,
}

fn default_authorized() -> bool {
    true
}

impl Default for SampleFile {
    fn default() -> Self {
        Self {
            authorized: true,
            heart_rate: Vec::new(),
            hrv: Vec::new(),
            steps: Vec::new(),
        }
    }
}

impl SampleFile {
    /// Samples recorded for one metric.
    pub fn samples(&self, kind: MetricKind) -> &[Sample] {
        match kind {
            MetricKind::HeartRate => &self.heart_rate,
            MetricKind::Hrv => &self.hrv,
            MetricKind::Steps => &self.steps,
        }
    }
}

/// A sensor source backed by a JSON sample file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Create a source reading from the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the sample file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last modification time of the sample file, if it exists.
    pub fn modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
    }

    async fn read(&self) -> Result<Option<SampleFile>, SourceError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SourceError::Unavailable(e.to_string())),
        };

        let file: SampleFile =
            serde_json::from_str(&content).map_err(|e| SourceError::Parse(e.to_string()))?;
        Ok(Some(file))
    }
}

#[async_trait]
impl SampleSource for FileSource {
    async fn fetch_samples(
        &self,
        kind: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Sample>, SourceError> {
        let Some(file) = self.read().await? else {
            return Ok(Vec::new());
        };

        if !file.authorized {
            return Err(SourceError::AuthorizationDenied);
        }

        Ok(file
            .samples(kind)
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp < end)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn write_file(dir: &Path, file: &SampleFile) -> PathBuf {
        let path = dir.join("samples.json");
        std::fs::write(&path, serde_json::to_string(file).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(dir.path().join("absent.json"));
        let now = Utc::now();
        let samples = source
            .fetch_samples(MetricKind::HeartRate, now - Duration::hours(1), now)
            .await
            .unwrap();
        assert!(samples.is_empty());
        assert!(source.modified().is_none());
    }

    #[tokio::test]
    async fn test_filters_by_time_range() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let mut file = SampleFile::default();
        file.heart_rate = vec![
            Sample::new(70.0, now - Duration::minutes(30)),
            Sample::new(90.0, now - Duration::hours(3)),
        ];
        file.steps = vec![Sample::new(1200.0, now - Duration::minutes(5))];
        let source = FileSource::new(write_file(dir.path(), &file));

        let hr = source
            .fetch_samples(MetricKind::HeartRate, now - Duration::hours(1), now)
            .await
            .unwrap();
        assert_eq!(hr.len(), 1);
        assert_eq!(hr[0].value, 70.0);

        let hrv = source
            .fetch_samples(MetricKind::Hrv, now - Duration::hours(1), now)
            .await
            .unwrap();
        assert!(hrv.is_empty());
    }

    #[tokio::test]
    async fn test_denied_authorization() {
        let dir = tempfile::tempdir().unwrap();
        let file = SampleFile {
            authorized: false,
            ..SampleFile::default()
        };
        let source = FileSource::new(write_file(dir.path(), &file));
        let now = Utc::now();
        let result = source
            .fetch_samples(MetricKind::Steps, now - Duration::hours(1), now)
            .await;
        assert_eq!(result, Err(SourceError::AuthorizationDenied));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.json");
        std::fs::write(&path, "{not json").unwrap();
        let source = FileSource::new(path);
        let now = Utc::now();
        let result = source
            .fetch_samples(MetricKind::Hrv, now - Duration::hours(1), now)
            .await;
        assert!(matches!(result, Err(SourceError::Parse(_))));
    }

    #[test]
    fn test_sample_ids_are_optional_in_files() {
        let json = r#"{"heart_rate":[{"value":64.0,"timestamp":"2024-01-22T10:00:00Z"}]}"#;
        let file: SampleFile = serde_json::from_str(json).unwrap();
        assert!(file.authorized);
        assert_eq!(file.heart_rate.len(), 1);
        assert!(!file.heart_rate[0].id.is_empty());
    }
}
