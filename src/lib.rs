//! Vitals Triage Agent - periodic heart-rate, HRV and step triage.
//!
//! This library samples physiological time series on a fixed cadence,
//! decides whether the pattern warrants remote analysis, and records a
//! human-readable assessment in a persistent conversational log.
//!
//! # Guarantees
//!
//! - **Always an answer**: every cycle ends in a device notice, a local
//!   analysis or a remote analysis, never a bare error
//! - **Escalation gates the network**: only out-of-band metrics are sent
//! - **One cycle at a time**: concurrent triggers are dropped, not stacked
//! - **No partial writes**: an expired cycle leaves the log untouched
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Vitals Triage Agent                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │  Scheduler  │──▶│  Collector  │──▶│   Triage    │       │
//! │  │ (triggers)  │   │  (windows)  │   │  (classify) │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                                             │               │
//! │                                             ▼               │
//! │  ┌─────────────┐                     ┌─────────────┐       │
//! │  │  Message    │◀────────────────────│  Analysis   │       │
//! │  │    Log      │                     │  (remote)   │       │
//! │  └─────────────┘                     └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vitals_triage_agent::{
//!     analysis::{AnalysisClient, AnalysisConfig},
//!     collector::FileSource,
//!     core::Lookback,
//!     messages::MessageLog,
//!     pipeline::TriagePipeline,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = AnalysisClient::new(AnalysisConfig::from_env())?;
//! let pipeline = TriagePipeline::new(
//!     Arc::new(FileSource::new("samples.json")),
//!     Arc::new(client),
//!     Arc::new(MessageLog::in_memory()),
//!     chrono_tz::Tz::UTC,
//! );
//!
//! let report = pipeline
//!     .run_cycle(Lookback::hours(24), &CancellationToken::new())
//!     .await?;
//! println!("{}", report.reply);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod collector;
pub mod config;
pub mod core;
pub mod messages;
pub mod pipeline;
pub mod scheduler;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use analysis::{AnalysisClient, AnalysisConfig, AnalysisError, AnalysisOutcome, AnalysisSource};
pub use collector::{FileSource, MetricKind, NoopSource, Sample, SampleSource, SourceError};
pub use config::Config;
pub use core::{classify, Aggregate, Lookback, MetricWindow, SampleStore, TriageVerdict};
pub use messages::{Message, MessageLog, Origin, SharedMessageLog};
pub use pipeline::{CycleError, CycleReport, TriagePipeline};
pub use scheduler::{Scheduler, SchedulerSettings, Trigger};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Disclaimer that can be displayed to users.
pub const DISCLAIMER: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║              VITALS TRIAGE AGENT - HEALTH DISCLAIMER             ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This agent summarises heart rate, HRV and step counts.          ║
║                                                                  ║
║  ✓ WHAT IT DOES:                                                 ║
║    • Compares recent averages against general wellness ranges    ║
║    • Asks a remote service for a second opinion when a metric    ║
║      is out of range                                             ║
║    • Keeps a history of every analysis on this device            ║
║                                                                  ║
║  ✗ WHAT IT IS NOT:                                               ║
║    • Medical advice, diagnosis or treatment                      ║
║    • A substitute for a qualified clinician                      ║
║    • An emergency alerting service                               ║
║                                                                  ║
║  If you feel unwell, contact a healthcare professional.          ║
║                                                                  ║
║  You can review past analyses anytime with:                      ║
║    vitals-triage history                                         ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
