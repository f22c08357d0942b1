//! Configuration for the vitals triage agent.

use crate::analysis::{AnalysisConfig, ENDPOINT_ENV_VAR};
use crate::core::windowing::Lookback;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Directory name under the platform config and data dirs.
const APP_DIR: &str = "vitals-triage-agent";

/// Shortest interval any timer or budget may be configured with.
const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Main configuration for the triage agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Run the foreground repeating timer
    pub auto_refresh: bool,

    /// Register and schedule background work
    pub background_updates: bool,

    /// Foreground timer period
    #[serde(with = "duration_serde")]
    pub refresh_interval: Duration,

    /// Minimum delay before the next background trigger
    #[serde(with = "duration_serde")]
    pub background_delay: Duration,

    /// Time a background invocation may run before it expires
    #[serde(with = "duration_serde")]
    pub background_budget: Duration,

    /// Lookback per trigger source
    pub lookback: LookbackConfig,

    /// Remote analysis endpoint; `API_BASE_URL` or the default when unset
    pub analysis_endpoint: Option<String>,

    /// Bound on each remote call
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// IANA timezone used by the `today` lookback
    pub timezone: String,

    /// JSON sample file read by the file source
    pub source_path: PathBuf,

    /// Path for the persisted message log
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            auto_refresh: true,
            background_updates: true,
            refresh_interval: Duration::from_secs(3600),
            background_delay: Duration::from_secs(3600),
            background_budget: Duration::from_secs(30),
            lookback: LookbackConfig::default(),
            analysis_endpoint: None,
            request_timeout: Duration::from_secs(crate::analysis::DEFAULT_TIMEOUT_SECS),
            timezone: "UTC".to_string(),
            source_path: data_dir.join("samples.json"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file, defaulting when it is absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("refresh_interval", self.refresh_interval),
            ("background_delay", self.background_delay),
            ("background_budget", self.background_budget),
            ("request_timeout", self.request_timeout),
        ];
        for (name, period) in periods {
            if period < MIN_PERIOD {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at least 1 second"
                )));
            }
        }
        self.tz()?;
        Ok(())
    }

    /// Parse the configured timezone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Invalid(format!("unknown timezone: {}", self.timezone)))
    }

    /// Resolve the analysis endpoint: config, then `API_BASE_URL`, then the default.
    pub fn analysis_config(&self) -> AnalysisConfig {
        let base = match &self.analysis_endpoint {
            Some(endpoint) if !endpoint.trim().is_empty() => AnalysisConfig::new(endpoint.clone()),
            _ => AnalysisConfig::from_env(),
        };
        base.with_timeout(self.request_timeout)
    }

    /// Human-readable description of where the endpoint came from.
    pub fn endpoint_origin(&self) -> &'static str {
        if self.analysis_endpoint.is_some() {
            "config"
        } else if std::env::var(ENDPOINT_ENV_VAR).is_ok() {
            ENDPOINT_ENV_VAR
        } else {
            "default"
        }
    }
}

/// How far back each kind of trigger looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookbackConfig {
    /// Foreground timer ticks
    pub foreground: Lookback,
    /// Background invocations
    pub background: Lookback,
    /// Manual refresh and source updates
    pub triage: Lookback,
}

impl Default for LookbackConfig {
    fn default() -> Self {
        Self {
            foreground: Lookback::hours(1),
            background: Lookback::hours(12),
            triage: Lookback::hours(24),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.auto_refresh);
        assert!(config.background_updates);
        assert_eq!(config.refresh_interval, Duration::from_secs(3600));
        assert_eq!(config.background_delay, Duration::from_secs(3600));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.lookback.foreground, Lookback::hours(1));
        assert_eq!(config.lookback.background, Lookback::hours(12));
        assert_eq!(config.lookback.triage, Lookback::hours(24));
        assert_eq!(config.tz().unwrap(), Tz::UTC);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"background_updates": false, "refresh_interval": 60}"#)
                .unwrap();
        assert!(!config.background_updates);
        assert!(config.auto_refresh);
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.lookback, LookbackConfig::default());
    }

    #[test]
    fn test_today_lookback_from_file() {
        let config: Config = serde_json::from_str(
            r#"{"timezone": "Asia/Hong_Kong", "lookback": {"triage": {"mode": "today"}}}"#,
        )
        .unwrap();
        assert_eq!(config.lookback.triage, Lookback::Today);
        assert_eq!(config.lookback.foreground, Lookback::hours(1));
        assert_eq!(config.tz().unwrap(), chrono_tz::Asia::Hong_Kong);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.auto_refresh = false;
        config.analysis_endpoint = Some("http://analysis.test/api".to_string());
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.timezone = "Mars/Olympus_Mons".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.refresh_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        // A zero delay would resubmit the background task for "now" forever.
        let mut config = Config::default();
        config.background_delay = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(m)) if m.contains("background_delay")
        ));

        let mut config = Config::default();
        config.background_budget = Duration::from_millis(500);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(m)) if m.contains("background_budget")
        ));

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_background_delay_in_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "background_delay": 0 }"#).unwrap();

        assert!(matches!(Config::load_from(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_explicit_endpoint_wins() {
        let mut config = Config::default();
        config.analysis_endpoint = Some("http://analysis.test/api".to_string());
        config.request_timeout = Duration::from_secs(5);

        let analysis = config.analysis_config();
        assert_eq!(analysis.endpoint, "http://analysis.test/api");
        assert_eq!(analysis.timeout, Duration::from_secs(5));
        assert_eq!(config.endpoint_origin(), "config");
    }
}
