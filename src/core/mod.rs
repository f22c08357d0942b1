//! Core functionality for the triage agent.
//!
//! This module contains:
//! - Metric windows and aggregate queries over them
//! - The triage engine that classifies a cycle's samples

pub mod triage;
pub mod windowing;

// Re-export commonly used types
pub use triage::{
    classify, classify_store, HeartRateBand, HrvBand, StepsBand, TriageClass, TriageVerdict,
    DEVICE_NOT_WORN_MESSAGE, NO_DATA_MESSAGE,
};
pub use windowing::{Aggregate, Lookback, MetricWindow, SampleStore};
