//! Metric windows and the per-cycle sample store.
//!
//! A metric window holds the samples of one metric over a bounded lookback
//! interval. The lookback is chosen at each call site (1 hour for the
//! foreground timer, 12 hours for background refresh, 1 day for the main
//! triage), never baked in here.

use crate::collector::types::{MetricKind, Sample};
use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Aggregate statistics over a window.
///
/// An empty window aggregates to all zeros with `count == 0`. Check `count`
/// before treating `mean` as a measured value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub mean: f64,
    pub max: f64,
    pub min: f64,
    pub sum: f64,
    pub count: usize,
}

impl Aggregate {
    /// The measured average, or `None` when the window had no readings.
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Whether any readings contributed.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Samples of one metric over a lookback interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricWindow {
    /// Metric held by this window
    pub kind: MetricKind,
    /// Start of the lookback interval
    pub start: DateTime<Utc>,
    /// End of the lookback interval
    pub end: DateTime<Utc>,
    /// Samples, in whatever order the source produced them
    pub samples: Vec<Sample>,
}

impl MetricWindow {
    /// Create a new empty window.
    pub fn new(kind: MetricKind, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            kind,
            start,
            end,
            samples: Vec::new(),
        }
    }

    /// Create a window holding the given samples.
    pub fn with_samples(
        kind: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        samples: Vec<Sample>,
    ) -> Self {
        Self {
            kind,
            start,
            end,
            samples,
        }
    }

    /// Build a window from bare values, all stamped now. Handy for fixtures.
    pub fn from_values(kind: MetricKind, values: &[f64]) -> Self {
        let now = Utc::now();
        let samples = values.iter().map(|&v| Sample::new(v, now)).collect();
        Self::with_samples(kind, now - Duration::days(1), now, samples)
    }

    /// Check if the window has any samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples in the window.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Compute order-independent aggregates.
    ///
    /// Non-finite readings are skipped so a bad sample cannot turn every
    /// aggregate into NaN.
    pub fn aggregate(&self) -> Aggregate {
        let mut agg = Aggregate {
            max: f64::NEG_INFINITY,
            min: f64::INFINITY,
            ..Aggregate::default()
        };

        for value in self.samples.iter().map(|s| s.value).filter(|v| v.is_finite()) {
            agg.sum += value;
            agg.max = agg.max.max(value);
            agg.min = agg.min.min(value);
            agg.count += 1;
        }

        if agg.count == 0 {
            return Aggregate::default();
        }

        agg.mean = agg.sum / agg.count as f64;
        agg
    }
}

/// The three metric windows collected by one triage cycle.
///
/// Owned by the cycle that created it; the message log keeps immutable
/// copies as attached snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleStore {
    pub heart_rate: MetricWindow,
    pub hrv: MetricWindow,
    pub steps: MetricWindow,
}

impl SampleStore {
    /// Create a store with three empty windows over the same interval.
    pub fn empty(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            heart_rate: MetricWindow::new(MetricKind::HeartRate, start, end),
            hrv: MetricWindow::new(MetricKind::Hrv, start, end),
            steps: MetricWindow::new(MetricKind::Steps, start, end),
        }
    }

    /// Build a store from bare values. Handy for fixtures.
    pub fn from_values(heart_rate: &[f64], hrv: &[f64], steps: &[f64]) -> Self {
        Self {
            heart_rate: MetricWindow::from_values(MetricKind::HeartRate, heart_rate),
            hrv: MetricWindow::from_values(MetricKind::Hrv, hrv),
            steps: MetricWindow::from_values(MetricKind::Steps, steps),
        }
    }

    /// Window for one metric.
    pub fn window(&self, kind: MetricKind) -> &MetricWindow {
        match kind {
            MetricKind::HeartRate => &self.heart_rate,
            MetricKind::Hrv => &self.hrv,
            MetricKind::Steps => &self.steps,
        }
    }

    /// True when no metric has any samples.
    pub fn is_empty(&self) -> bool {
        self.heart_rate.is_empty() && self.hrv.is_empty() && self.steps.is_empty()
    }

    /// Total number of samples across all metrics.
    pub fn sample_count(&self) -> usize {
        self.heart_rate.len() + self.hrv.len() + self.steps.len()
    }
}

/// Longest lookback honoured; roughly a century.
const MAX_LOOKBACK_SECS: u64 = 100 * 365 * 24 * 3600;

/// How far back a triage cycle looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Lookback {
    /// A fixed interval ending now
    Trailing { secs: u64 },
    /// Since local midnight in the configured timezone
    Today,
}

impl Lookback {
    /// Trailing lookback of the given number of hours.
    pub fn hours(hours: u64) -> Self {
        Lookback::Trailing {
            secs: hours.saturating_mul(3600),
        }
    }

    /// Start of the lookback interval ending at `now`.
    pub fn start(&self, now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        match *self {
            Lookback::Trailing { secs } => {
                let secs = secs.min(MAX_LOOKBACK_SECS) as i64;
                now.checked_sub_signed(Duration::seconds(secs))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC)
            }
            Lookback::Today => now
                .with_timezone(&tz)
                .date_naive()
                .and_hms_opt(0, 0, 0)
                // Midnight can be skipped or repeated by DST transitions.
                .and_then(|midnight| tz.from_local_datetime(&midnight).earliest())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| now - Duration::days(1)),
        }
    }
}

impl std::fmt::Display for Lookback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lookback::Trailing { secs } if secs % 3600 == 0 => write!(f, "last {}h", secs / 3600),
            Lookback::Trailing { secs } => write!(f, "last {secs}s"),
            Lookback::Today => write!(f, "today"),
        }
    }
}
