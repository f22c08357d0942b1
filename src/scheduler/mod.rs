//! Scheduling of triage cycles.
//!
//! - `runner`: the trigger loop and its single-slot run queue
//! - `platform`: the background-task collaborator interface

pub mod platform;
pub mod runner;

// Re-export commonly used types
pub use platform::{
    BackgroundInvocation, LocalTaskPlatform, PlatformError, TaskPlatform, BACKGROUND_TASK_ID,
};
pub use runner::{
    trigger_channel, CycleState, Scheduler, SchedulerSettings, SchedulerStats, StatsSnapshot,
    Trigger,
};
