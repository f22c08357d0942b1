//! Triage engine: decides whether a cycle's samples warrant remote analysis
//! and always produces a complete local report.
//!
//! Classification is a three-tier gate, first match wins:
//!
//! 1. every window empty: no data, check device pairing
//! 2. heart rate and HRV both average zero: device not worn or not synced
//! 3. metric thresholds: escalate when heart rate or HRV is out of band
//!
//! The first two tiers never escalate, so the remote service is never asked
//! to interpret degenerate all-zero input.

use crate::core::windowing::{Aggregate, MetricWindow, SampleStore};
use serde::{Deserialize, Serialize};

/// Message shown when no metric has any samples.
pub const NO_DATA_MESSAGE: &str = "No health data detected. Please check that your device is \
paired and synced with the health app.";

/// Message shown when heart rate and HRV both read zero.
pub const DEVICE_NOT_WORN_MESSAGE: &str = "Your device does not appear to be worn or synced. \
Please make sure it is worn properly and check the health app for data sync.";

/// Heart rate below this is low (BPM).
pub const HEART_RATE_LOW: f64 = 60.0;
/// Heart rate above this is elevated (BPM).
pub const HEART_RATE_HIGH: f64 = 100.0;
/// HRV below this is stress-indicative (ms).
pub const HRV_LOW: f64 = 50.0;
/// Fewer total steps than this is low activity.
pub const STEPS_LOW: f64 = 5000.0;
/// Total steps at or above this meets the daily goal.
pub const STEPS_GOAL: f64 = 10000.0;

/// Outcome class of a triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageClass {
    /// No samples for any metric
    NoData,
    /// Heart rate and HRV both average zero
    DeviceNotWorn,
    /// At least one metric is out of band
    Escalate,
    /// Everything within range
    Normal,
}

/// Result of classifying one cycle's samples.
///
/// Derived, never stored; recomputed every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct TriageVerdict {
    pub class: TriageClass,
    pub requires_escalation: bool,
    pub device_issue_message: Option<String>,
    pub local_analysis: String,
}

/// Heart-rate band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartRateBand {
    Low,
    Normal,
    Elevated,
}

impl HeartRateBand {
    pub fn of(mean: f64) -> Self {
        if mean < HEART_RATE_LOW {
            HeartRateBand::Low
        } else if mean > HEART_RATE_HIGH {
            HeartRateBand::Elevated
        } else {
            HeartRateBand::Normal
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HeartRateBand::Low => "low",
            HeartRateBand::Normal => "normal",
            HeartRateBand::Elevated => "elevated",
        }
    }
}

/// HRV band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrvBand {
    Low,
    Healthy,
}

impl HrvBand {
    pub fn of(mean: f64) -> Self {
        if mean < HRV_LOW {
            HrvBand::Low
        } else {
            HrvBand::Healthy
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HrvBand::Low => "low, stress-indicative",
            HrvBand::Healthy => "healthy",
        }
    }
}

/// Step-count band, judged on the window total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepsBand {
    LowActivity,
    ApproachingGoal,
    GoalMet,
}

impl StepsBand {
    pub fn of(total: f64) -> Self {
        if total < STEPS_LOW {
            StepsBand::LowActivity
        } else if total < STEPS_GOAL {
            StepsBand::ApproachingGoal
        } else {
            StepsBand::GoalMet
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepsBand::LowActivity => "low activity",
            StepsBand::ApproachingGoal => "approaching goal",
            StepsBand::GoalMet => "goal met",
        }
    }
}

/// Classify a cycle's sample store.
pub fn classify_store(store: &SampleStore) -> TriageVerdict {
    classify(&store.heart_rate, &store.hrv, &store.steps)
}

/// Classify three metric windows. Total and deterministic.
pub fn classify(heart_rate: &MetricWindow, hrv: &MetricWindow, steps: &MetricWindow) -> TriageVerdict {
    let hr = heart_rate.aggregate();
    let hv = hrv.aggregate();
    let st = steps.aggregate();
    let local_analysis = local_analysis(&hr, &hv, &st);

    if heart_rate.is_empty() && hrv.is_empty() && steps.is_empty() {
        return TriageVerdict {
            class: TriageClass::NoData,
            requires_escalation: false,
            device_issue_message: Some(NO_DATA_MESSAGE.to_string()),
            local_analysis,
        };
    }

    if hr.mean == 0.0 && hv.mean == 0.0 {
        return TriageVerdict {
            class: TriageClass::DeviceNotWorn,
            requires_escalation: false,
            device_issue_message: Some(DEVICE_NOT_WORN_MESSAGE.to_string()),
            local_analysis,
        };
    }

    // A metric with no readings has no average and cannot be out of band.
    let abnormal_hr = hr
        .average()
        .map(|mean| HeartRateBand::of(mean) != HeartRateBand::Normal)
        .unwrap_or(false);
    let abnormal_hrv = hv
        .average()
        .map(|mean| HrvBand::of(mean) == HrvBand::Low)
        .unwrap_or(false);
    let requires_escalation = abnormal_hr || abnormal_hrv;

    TriageVerdict {
        class: if requires_escalation {
            TriageClass::Escalate
        } else {
            TriageClass::Normal
        },
        requires_escalation,
        device_issue_message: None,
        local_analysis,
    }
}

/// Build the deterministic local report.
fn local_analysis(hr: &Aggregate, hrv: &Aggregate, steps: &Aggregate) -> String {
    let hr_band = hr.average().map(HeartRateBand::of);
    let hrv_band = hrv.average().map(HrvBand::of);
    let steps_band = (!steps.is_empty()).then(|| StepsBand::of(steps.sum));

    let mut report = String::from("Health Data Analysis:\n");

    if let Some(band) = hr_band {
        report.push_str("\nHeart Rate:\n");
        report.push_str(&format!("Average: {:.1} BPM ({})\n", hr.mean, band.label()));
        report.push_str(match band {
            HeartRateBand::Low => "Your heart rate is lower than normal. Monitor for any symptoms.\n",
            HeartRateBand::Normal => "Your heart rate is within normal range.\n",
            HeartRateBand::Elevated => {
                "Your heart rate is elevated. Consider relaxation techniques.\n"
            }
        });
    }

    if let Some(band) = hrv_band {
        report.push_str("\nHeart Rate Variability:\n");
        report.push_str(&format!("Average: {:.1} ms ({})\n", hrv.mean, band.label()));
        report.push_str(match band {
            HrvBand::Low => "Your HRV is lower than optimal. This might indicate stress.\n",
            HrvBand::Healthy => "Your HRV is in a healthy range.\n",
        });
    }

    if let Some(band) = steps_band {
        report.push_str("\nSteps:\n");
        report.push_str(&format!("Total: {:.0} steps ({})\n", steps.sum, band.label()));
        report.push_str(match band {
            StepsBand::LowActivity => "You might want to increase your daily activity.\n",
            StepsBand::ApproachingGoal => "You're on your way to reaching the daily step goal.\n",
            StepsBand::GoalMet => "Great job! You've reached the recommended daily step goal.\n",
        });
    }

    if hr_band.is_none() && hrv_band.is_none() && steps_band.is_none() {
        report.push_str("\nNo samples were recorded in this window.\n");
    }

    report.push_str("\nRecommendations:\n");
    let stressed = hr_band == Some(HeartRateBand::Elevated) || hrv_band == Some(HrvBand::Low);
    let slow = hr_band == Some(HeartRateBand::Low);

    if stressed {
        report.push_str("- Practice deep breathing exercises\n");
        report.push_str("- Ensure adequate rest\n");
        report.push_str("- Consider stress management techniques\n");
    }
    if slow {
        report.push_str("- Watch for dizziness or fatigue and consult a clinician if they persist\n");
    }
    if !stressed && !slow {
        report.push_str("- Continue maintaining your healthy lifestyle\n");
        report.push_str("- Keep up regular exercise and good sleep habits\n");
    }
    if steps_band == Some(StepsBand::LowActivity) {
        report.push_str("- Try to incorporate more walking into your daily routine\n");
        report.push_str("- Take short walks during breaks\n");
    }

    report
}
