//! Client for the remote analysis endpoint.
//!
//! Remote analysis is always best-effort. Health-data requests fall back to
//! the triage engine's local report on any failure, and chat requests fall
//! back to an apology, so the user never sees a bare error.
//!
//! | outcome                       | health-data result                     |
//! |-------------------------------|----------------------------------------|
//! | device issue                  | device message, no request             |
//! | not escalated                 | local report, no request               |
//! | timeout / connection error    | local report + "server unavailable"    |
//! | non-2xx status                | local report + "experiencing issues"   |
//! | body without `result`/`message` | local report, no note                |
//! | `result` or `message` string  | that string                            |

use crate::core::triage::TriageVerdict;
use crate::core::windowing::{MetricWindow, SampleStore};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Endpoint used when neither the config nor `API_BASE_URL` name one.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:3000/api/health-feedback";

/// Environment variable overriding the endpoint.
pub const ENDPOINT_ENV_VAR: &str = "API_BASE_URL";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Appended to local reports when the endpoint could not be reached.
pub const SERVER_UNAVAILABLE_NOTE: &str = "(Note: local analysis, server unavailable)";

/// Appended to local reports when the endpoint returned an error status.
pub const SERVER_ISSUES_NOTE: &str = "(Note: local analysis, server experiencing issues)";

/// Chat reply when the endpoint could not be reached.
pub const CHAT_UNAVAILABLE_REPLY: &str =
    "Sorry, the server is temporarily unreachable. Please try again later.";

/// Chat reply when the endpoint returned an error status.
pub const CHAT_SERVER_ERROR_REPLY: &str =
    "Sorry, the server is having problems right now. Please try again later.";

/// Chat reply when the endpoint's answer could not be understood.
pub const CHAT_MALFORMED_REPLY: &str =
    "Sorry, I couldn't understand the server's reply. Please try again later.";

/// Analysis endpoint configuration.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Full endpoint URL
    pub endpoint: String,
    /// Bound on each request, including the body read
    pub timeout: Duration,
}

impl AnalysisConfig {
    /// Create a new configuration with the default timeout.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Override the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read the endpoint from `API_BASE_URL`, falling back to the default.
    pub fn from_env() -> Self {
        let endpoint = std::env::var(ENDPOINT_ENV_VAR)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Self::new(endpoint)
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

/// Analysis client error types.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Configuration error
    Config(String),
    /// The request did not complete within the timeout
    Timeout,
    /// Connection or transport error
    Network(String),
    /// Server returned an error status
    Server { status: u16, message: String },
    /// Success status but the body was not a usable reply
    Malformed(String),
}

impl AnalysisError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AnalysisError::Timeout
        } else {
            AnalysisError::Network(e.to_string())
        }
    }
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisError::Config(msg) => write!(f, "Analysis config error: {msg}"),
            AnalysisError::Timeout => write!(f, "Analysis request timed out"),
            AnalysisError::Network(msg) => write!(f, "Analysis network error: {msg}"),
            AnalysisError::Server { status, message } => {
                write!(f, "Analysis server error ({status}): {message}")
            }
            AnalysisError::Malformed(msg) => write!(f, "Malformed analysis response: {msg}"),
        }
    }
}

impl std::error::Error for AnalysisError {}

/// Request discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    HealthData,
    Chat,
}

/// Request body for the analysis endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub require_analysis: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_data: Option<HealthDataPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AnalysisRequest {
    /// Health-data request for a cycle's windows.
    pub fn health_data(store: &SampleStore) -> Self {
        Self {
            kind: RequestKind::HealthData,
            require_analysis: true,
            health_data: Some(HealthDataPayload::from_store(store)),
            message: None,
        }
    }

    /// Free-text chat request.
    pub fn chat(text: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Chat,
            require_analysis: true,
            health_data: None,
            message: Some(text.into()),
        }
    }
}

/// The three windows as `{value, timestamp}` pairs.
#[derive(Debug, Clone, Serialize)]
pub struct HealthDataPayload {
    pub heart_rates: Vec<SamplePayload>,
    pub hrvs: Vec<SamplePayload>,
    pub steps: Vec<SamplePayload>,
}

impl HealthDataPayload {
    pub fn from_store(store: &SampleStore) -> Self {
        Self {
            heart_rates: SamplePayload::from_window(&store.heart_rate),
            hrvs: SamplePayload::from_window(&store.hrv),
            steps: SamplePayload::from_window(&store.steps),
        }
    }
}

/// A single sample on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplePayload {
    pub value: f64,
    /// ISO-8601, UTC
    pub timestamp: String,
}

impl SamplePayload {
    fn from_window(window: &MetricWindow) -> Vec<Self> {
        window
            .samples
            .iter()
            .map(|s| SamplePayload {
                value: s.value,
                timestamp: s.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            })
            .collect()
    }
}

/// Pull the reply text out of a response body.
///
/// The body must be a JSON object with a string `result` or, failing that,
/// a string `message`.
pub fn extract_reply(body: &str) -> Result<String, AnalysisError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| AnalysisError::Malformed(e.to_string()))?;

    let object = value
        .as_object()
        .ok_or_else(|| AnalysisError::Malformed("response is not a JSON object".to_string()))?;

    ["result", "message"]
        .iter()
        .find_map(|field| object.get(*field).and_then(|v| v.as_str()))
        .map(str::to_string)
        .ok_or_else(|| {
            AnalysisError::Malformed("response has no `result` or `message` string".to_string())
        })
}

/// Why a local report replaced the remote analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Timeout or connection error
    ServerUnavailable,
    /// Non-2xx status
    ServerError,
    /// Unparseable or unexpected body
    MalformedResponse,
}

impl FallbackReason {
    /// Note appended to the local report, if the user is told.
    pub fn note(&self) -> Option<&'static str> {
        match self {
            FallbackReason::ServerUnavailable => Some(SERVER_UNAVAILABLE_NOTE),
            FallbackReason::ServerError => Some(SERVER_ISSUES_NOTE),
            FallbackReason::MalformedResponse => None,
        }
    }
}

impl From<&AnalysisError> for FallbackReason {
    fn from(e: &AnalysisError) -> Self {
        match e {
            AnalysisError::Timeout | AnalysisError::Network(_) | AnalysisError::Config(_) => {
                FallbackReason::ServerUnavailable
            }
            AnalysisError::Server { .. } => FallbackReason::ServerError,
            AnalysisError::Malformed(_) => FallbackReason::MalformedResponse,
        }
    }
}

/// Where an analysis text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "reason", rename_all = "snake_case")]
pub enum AnalysisSource {
    /// The triage engine reported a device problem
    DeviceIssue,
    /// Not escalated; the local report is the answer
    Local,
    /// The remote endpoint answered
    Remote,
    /// Escalated, but the remote call failed
    Fallback(FallbackReason),
}

/// The analysis shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub text: String,
    pub source: AnalysisSource,
}

impl AnalysisOutcome {
    /// Whether the text is a local stand-in for a failed remote analysis.
    pub fn is_degraded(&self) -> bool {
        matches!(self.source, AnalysisSource::Fallback(_))
    }

    fn fallback(verdict: &TriageVerdict, reason: FallbackReason) -> Self {
        let text = match reason.note() {
            Some(note) => format!("{}\n\n{note}", verdict.local_analysis.trim_end()),
            None => verdict.local_analysis.clone(),
        };
        Self {
            text,
            source: AnalysisSource::Fallback(reason),
        }
    }
}

/// Reply to a chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub text: String,
    /// False when `text` is an apology rather than the server's answer
    pub delivered: bool,
}

/// Client for the remote analysis endpoint.
pub struct AnalysisClient {
    config: AnalysisConfig,
    client: reqwest::Client,
    device_id: String,
}

impl AnalysisClient {
    /// Create a new analysis client.
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AnalysisError::Config(format!("Failed to create HTTP client: {e}")))?;

        // Generate device ID from hostname + instance
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let device_id = format!(
            "triage-{}-{}",
            hostname,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );

        Ok(Self {
            config,
            client,
            device_id,
        })
    }

    /// Get the endpoint configuration.
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Get the device ID.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Produce the analysis for a classified cycle.
    ///
    /// Only escalated verdicts reach the network.
    pub async fn analyze(&self, store: &SampleStore, verdict: &TriageVerdict) -> AnalysisOutcome {
        if let Some(message) = &verdict.device_issue_message {
            debug!(class = ?verdict.class, "Device issue, skipping remote analysis");
            return AnalysisOutcome {
                text: message.clone(),
                source: AnalysisSource::DeviceIssue,
            };
        }

        if !verdict.requires_escalation {
            debug!("Metrics within range, using local analysis");
            return AnalysisOutcome {
                text: verdict.local_analysis.clone(),
                source: AnalysisSource::Local,
            };
        }

        info!(
            samples = store.sample_count(),
            "Escalating to remote analysis"
        );
        match self.post(&AnalysisRequest::health_data(store)).await {
            Ok(text) => AnalysisOutcome {
                text,
                source: AnalysisSource::Remote,
            },
            Err(e) => {
                let reason = FallbackReason::from(&e);
                warn!(?reason, "Remote analysis failed, using local analysis: {e}");
                AnalysisOutcome::fallback(verdict, reason)
            }
        }
    }

    /// Send a free-text chat message.
    pub async fn send_chat_message(&self, text: &str) -> ChatReply {
        match self.post(&AnalysisRequest::chat(text)).await {
            Ok(text) => ChatReply {
                text,
                delivered: true,
            },
            Err(e) => {
                warn!("Chat request failed: {e}");
                let apology = match FallbackReason::from(&e) {
                    FallbackReason::ServerUnavailable => CHAT_UNAVAILABLE_REPLY,
                    FallbackReason::ServerError => CHAT_SERVER_ERROR_REPLY,
                    FallbackReason::MalformedResponse => CHAT_MALFORMED_REPLY,
                };
                ChatReply {
                    text: apology.to_string(),
                    delivered: false,
                }
            }
        }
    }

    /// POST a request and extract the reply text.
    pub async fn post(&self, request: &AnalysisRequest) -> Result<String, AnalysisError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("X-Device-Id", &self.device_id)
            .json(request)
            .send()
            .await
            .map_err(AnalysisError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AnalysisError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await.map_err(AnalysisError::from_reqwest)?;
        extract_reply(&body)
    }
}
