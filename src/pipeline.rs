//! One triage cycle: fetch, classify, analyze, append.
//!
//! A cycle owns its [`SampleStore`] from fetch to commit. Nothing is written
//! to the message log until analysis has finished, and the user entry and
//! the reply are committed together, so a cycle cancelled by its expiration
//! signal leaves the log untouched.

use crate::analysis::{AnalysisClient, AnalysisSource, ChatReply};
use crate::collector::{MetricKind, SampleSource, SourceError};
use crate::core::triage::{classify_store, TriageClass};
use crate::core::windowing::{Lookback, MetricWindow, SampleStore};
use crate::messages::{LogError, Message, SharedMessageLog};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Content of the user entry recorded for every completed cycle.
pub const HEALTH_DATA_PROMPT: &str = "Here's my latest health data";

/// Errors that end a cycle without a result.
#[derive(Debug)]
pub enum CycleError {
    /// The expiration signal fired before the cycle committed
    Expired,
    /// The message log could not be written
    Persistence(LogError),
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleError::Expired => write!(f, "Triage cycle expired before completion"),
            CycleError::Persistence(e) => write!(f, "Triage cycle could not be recorded: {e}"),
        }
    }
}

impl std::error::Error for CycleError {}

impl From<LogError> for CycleError {
    fn from(e: LogError) -> Self {
        CycleError::Persistence(e)
    }
}

/// Summary of a committed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub lookback: Lookback,
    pub class: TriageClass,
    pub source: AnalysisSource,
    pub sample_count: usize,
    /// Text of the reply appended to the log
    pub reply: String,
}

/// Fetch-classify-analyze-append pipeline shared by every trigger source.
pub struct TriagePipeline {
    source: Arc<dyn SampleSource>,
    client: Arc<AnalysisClient>,
    log: SharedMessageLog,
    timezone: Tz,
}

impl TriagePipeline {
    pub fn new(
        source: Arc<dyn SampleSource>,
        client: Arc<AnalysisClient>,
        log: SharedMessageLog,
        timezone: Tz,
    ) -> Self {
        Self {
            source,
            client,
            log,
            timezone,
        }
    }

    pub fn log(&self) -> &SharedMessageLog {
        &self.log
    }

    pub fn client(&self) -> &AnalysisClient {
        &self.client
    }

    /// Run one full cycle over `lookback`, ending now.
    pub async fn run_cycle(
        &self,
        lookback: Lookback,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, CycleError> {
        let end = Utc::now();
        let start = lookback.start(end, self.timezone);

        let store = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CycleError::Expired),
            store = self.collect(start, end) => store,
        };

        let verdict = classify_store(&store);
        debug!(class = ?verdict.class, samples = store.sample_count(), "Cycle classified");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CycleError::Expired),
            outcome = self.client.analyze(&store, &verdict) => outcome,
        };

        if cancel.is_cancelled() {
            return Err(CycleError::Expired);
        }

        let reply = match outcome.source {
            AnalysisSource::DeviceIssue => Message::system(outcome.text.clone()),
            _ => Message::ai(outcome.text.clone()).with_health_data(store.clone()),
        };
        let report = CycleReport {
            lookback,
            class: verdict.class,
            source: outcome.source,
            sample_count: store.sample_count(),
            reply: outcome.text,
        };

        let request = Message::user(HEALTH_DATA_PROMPT).with_health_data(store);
        self.commit(vec![request, reply]).await?;

        info!(
            lookback = %lookback,
            class = ?report.class,
            source = ?report.source,
            "Triage cycle recorded"
        );
        Ok(report)
    }

    /// Send a chat message, recording it before the remote call.
    pub async fn send_chat(&self, text: &str) -> Result<ChatReply, LogError> {
        self.commit(vec![Message::user(text)]).await?;

        let reply = self.client.send_chat_message(text).await;
        self.commit(vec![Message::ai(reply.text.clone())]).await?;
        Ok(reply)
    }

    /// Fetch all three windows over `[start, end)`.
    pub async fn collect(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> SampleStore {
        let (heart_rate, hrv, steps) = tokio::join!(
            self.fetch_window(MetricKind::HeartRate, start, end),
            self.fetch_window(MetricKind::Hrv, start, end),
            self.fetch_window(MetricKind::Steps, start, end),
        );
        SampleStore {
            heart_rate,
            hrv,
            steps,
        }
    }

    async fn fetch_window(
        &self,
        kind: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MetricWindow {
        match self.source.fetch_samples(kind, start, end).await {
            Ok(mut samples) => {
                // JSON has no NaN or infinity; a stored snapshot must reload.
                let fetched = samples.len();
                samples.retain(|s| s.value.is_finite());
                if samples.len() < fetched {
                    warn!(
                        %kind,
                        count = fetched - samples.len(),
                        "Dropping non-finite sensor readings"
                    );
                }
                MetricWindow::with_samples(kind, start, end, samples)
            }
            Err(SourceError::AuthorizationDenied) => {
                warn!(%kind, "Sensor authorization denied, treating as no data");
                MetricWindow::new(kind, start, end)
            }
            Err(e) => {
                warn!(%kind, "Sensor fetch failed, treating as no data: {e}");
                MetricWindow::new(kind, start, end)
            }
        }
    }

    /// Append a batch on the blocking pool.
    async fn commit(&self, batch: Vec<Message>) -> Result<(), LogError> {
        let log = Arc::clone(&self.log);
        tokio::task::spawn_blocking(move || log.append_all(batch))
            .await
            .map_err(|e| LogError::Worker(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisConfig;
    use crate::collector::{NoopSource, Sample};
    use crate::messages::{KeyValueStore, MemoryStore, MessageLog, Origin};
    use async_trait::async_trait;
    use std::io;

    struct DeniedSource;

    #[async_trait]
    impl SampleSource for DeniedSource {
        async fn fetch_samples(
            &self,
            _kind: MetricKind,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<Sample>, SourceError> {
            Err(SourceError::AuthorizationDenied)
        }
    }

    struct FixedSource;

    #[async_trait]
    impl SampleSource for FixedSource {
        async fn fetch_samples(
            &self,
            kind: MetricKind,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<Sample>, SourceError> {
            let values: &[f64] = match kind {
                MetricKind::HeartRate => &[72.0, 68.0],
                MetricKind::Hrv => &[62.0],
                MetricKind::Steps => &[6500.0],
            };
            Ok(values.iter().map(|&v| Sample::now(v)).collect())
        }
    }

    /// Normal readings mixed with values JSON cannot represent.
    struct NonFiniteSource;

    #[async_trait]
    impl SampleSource for NonFiniteSource {
        async fn fetch_samples(
            &self,
            kind: MetricKind,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<Sample>, SourceError> {
            let values: &[f64] = match kind {
                MetricKind::HeartRate => &[70.0, f64::NAN, 74.0],
                MetricKind::Hrv => &[f64::INFINITY, 60.0],
                MetricKind::Steps => &[f64::NEG_INFINITY, 5000.0],
            };
            Ok(values.iter().map(|&v| Sample::now(v)).collect())
        }
    }

    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> io::Result<Option<Vec<u8>>> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &[u8]) -> io::Result<()> {
            Err(io::Error::other("read-only filesystem"))
        }
    }

    fn pipeline_with_log(source: Arc<dyn SampleSource>, log: MessageLog) -> TriagePipeline {
        // Unroutable endpoint: these tests never escalate.
        let client = AnalysisClient::new(AnalysisConfig::new("http://127.0.0.1:9/unused")).unwrap();
        TriagePipeline::new(source, Arc::new(client), Arc::new(log), Tz::UTC)
    }

    fn pipeline(source: Arc<dyn SampleSource>) -> TriagePipeline {
        pipeline_with_log(source, MessageLog::in_memory())
    }

    #[tokio::test]
    async fn test_denied_source_reports_device_issue() {
        let pipeline = pipeline(Arc::new(DeniedSource));
        let report = pipeline
            .run_cycle(Lookback::hours(24), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.class, TriageClass::NoData);
        assert_eq!(report.source, AnalysisSource::DeviceIssue);

        let messages = pipeline.log().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].origin, Origin::User);
        assert_eq!(messages[1].origin, Origin::System);
        assert!(messages[1].health_data.is_none());
    }

    #[tokio::test]
    async fn test_normal_cycle_appends_request_then_analysis() {
        let pipeline = pipeline(Arc::new(FixedSource));
        let report = pipeline
            .run_cycle(Lookback::hours(1), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.class, TriageClass::Normal);
        assert_eq!(report.source, AnalysisSource::Local);
        assert_eq!(report.sample_count, 4);

        let messages = pipeline.log().messages();
        assert_eq!(messages[0].content, HEALTH_DATA_PROMPT);
        assert_eq!(messages[1].origin, Origin::Ai);
        assert_eq!(messages[1].content, report.reply);
        assert_eq!(
            messages[1].health_data.as_ref().map(|s| s.heart_rate.len()),
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_cancelled_cycle_writes_nothing() {
        let pipeline = pipeline(Arc::new(NoopSource::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pipeline.run_cycle(Lookback::hours(1), &cancel).await;
        assert!(matches!(result, Err(CycleError::Expired)));
        assert!(pipeline.log().is_empty());
    }

    #[tokio::test]
    async fn test_non_finite_readings_are_dropped_and_log_reloads() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let pipeline =
            pipeline_with_log(Arc::new(NonFiniteSource), MessageLog::load(store.clone()));

        let report = pipeline
            .run_cycle(Lookback::hours(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.sample_count, 4);

        let reloaded = MessageLog::load(store);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.messages(), pipeline.log().messages());

        let snapshot = reloaded.messages()[0].health_data.clone().unwrap();
        assert_eq!(snapshot.heart_rate.len(), 2);
        assert_eq!(snapshot.hrv.len(), 1);
        assert_eq!(snapshot.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_fails_the_cycle() {
        let pipeline =
            pipeline_with_log(Arc::new(FixedSource), MessageLog::load(Arc::new(ReadOnlyStore)));

        let result = pipeline
            .run_cycle(Lookback::hours(1), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(CycleError::Persistence(LogError::Io(_)))));
        assert!(pipeline.log().is_empty());
    }
}
