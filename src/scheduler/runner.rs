//! Trigger loop serializing every trigger source onto one pipeline.
//!
//! Four sources feed the loop: the foreground timer, background
//! invocations, manual refreshes and sensor-source updates. At most one
//! cycle runs at a time. A trigger that arrives while a cycle is running is
//! dropped and counted, never queued and never run concurrently.
//!
//! ```text
//!  timer ─┐
//!  background ─┤                     ┌── busy: drop + count
//!  manual ─┼──▶ dispatch ──▶ slot ──┤
//!  source updated ─┘                 └── free: spawn cycle ──▶ pipeline
//! ```

use super::platform::{BackgroundInvocation, TaskPlatform, BACKGROUND_TASK_ID};
use crate::config::{Config, LookbackConfig};
use crate::core::windowing::Lookback;
use crate::pipeline::{CycleError, TriagePipeline};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the trigger channel.
pub const TRIGGER_CHANNEL_CAPACITY: usize = 32;

/// Create the channel triggers are delivered on.
pub fn trigger_channel() -> (mpsc::Sender<Trigger>, mpsc::Receiver<Trigger>) {
    mpsc::channel(TRIGGER_CHANNEL_CAPACITY)
}

/// Something asking for a triage cycle.
#[derive(Debug)]
pub enum Trigger {
    /// The foreground repeating timer ticked
    ForegroundTimer,
    /// The platform woke the agent for background work
    Background(BackgroundInvocation),
    /// The user asked for a refresh
    Manual,
    /// The sensor source reported new data
    SourceUpdated,
}

impl Trigger {
    pub fn label(&self) -> &'static str {
        match self {
            Trigger::ForegroundTimer => "foreground",
            Trigger::Background(_) => "background",
            Trigger::Manual => "manual",
            Trigger::SourceUpdated => "source_updated",
        }
    }

    /// Lookback for the cycle this trigger starts.
    pub fn lookback(&self, lookbacks: &LookbackConfig) -> Lookback {
        match self {
            Trigger::ForegroundTimer => lookbacks.foreground,
            Trigger::Background(_) => lookbacks.background,
            Trigger::Manual | Trigger::SourceUpdated => lookbacks.triage,
        }
    }
}

/// The part of [`Config`] the scheduler reacts to.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub auto_refresh: bool,
    pub background_updates: bool,
    pub refresh_interval: Duration,
    pub background_delay: Duration,
    pub lookback: LookbackConfig,
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            auto_refresh: config.auto_refresh,
            background_updates: config.background_updates,
            refresh_interval: config.refresh_interval,
            background_delay: config.background_delay,
            lookback: config.lookback,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl SchedulerSettings {
    fn armed(&self) -> bool {
        self.auto_refresh || self.background_updates
    }
}

/// Lifecycle of the triage slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    /// No trigger source armed
    Idle,
    /// Waiting for the next trigger
    Scheduled,
    /// A cycle is in flight
    Running,
    /// The last cycle committed its result
    Completed,
    /// The last cycle was stopped by its expiration signal
    Expired,
}

/// Scheduler counters, shared with observers.
#[derive(Debug)]
pub struct SchedulerStats {
    cycles_started: AtomicU64,
    cycles_completed: AtomicU64,
    cycles_expired: AtomicU64,
    cycles_failed: AtomicU64,
    triggers_dropped: AtomicU64,
    background_submissions: AtomicU64,
    armed: AtomicBool,
    state: Mutex<CycleState>,
    last_outcome: Mutex<Option<CycleState>>,
}

impl Default for SchedulerStats {
    fn default() -> Self {
        Self {
            cycles_started: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            cycles_expired: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            triggers_dropped: AtomicU64::new(0),
            background_submissions: AtomicU64::new(0),
            armed: AtomicBool::new(false),
            state: Mutex::new(CycleState::Idle),
            last_outcome: Mutex::new(None),
        }
    }
}

impl SchedulerStats {
    pub fn cycles_started(&self) -> u64 {
        self.cycles_started.load(Ordering::Relaxed)
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn cycles_expired(&self) -> u64 {
        self.cycles_expired.load(Ordering::Relaxed)
    }

    pub fn cycles_failed(&self) -> u64 {
        self.cycles_failed.load(Ordering::Relaxed)
    }

    pub fn triggers_dropped(&self) -> u64 {
        self.triggers_dropped.load(Ordering::Relaxed)
    }

    pub fn background_submissions(&self) -> u64 {
        self.background_submissions.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> CycleState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// How the most recent cycle ended.
    pub fn last_outcome(&self) -> Option<CycleState> {
        *self.last_outcome.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            state: self.state(),
            last_outcome: self.last_outcome(),
            cycles_started: self.cycles_started(),
            cycles_completed: self.cycles_completed(),
            cycles_expired: self.cycles_expired(),
            cycles_failed: self.cycles_failed(),
            triggers_dropped: self.triggers_dropped(),
            background_submissions: self.background_submissions(),
        }
    }

    fn set_state(&self, state: CycleState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn set_armed(&self, armed: bool) {
        self.armed.store(armed, Ordering::Relaxed);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != CycleState::Running {
            *state = if armed {
                CycleState::Scheduled
            } else {
                CycleState::Idle
            };
        }
    }

    fn start_cycle(&self) {
        self.cycles_started.fetch_add(1, Ordering::Relaxed);
        self.set_state(CycleState::Running);
    }

    fn finish_cycle(&self, outcome: Outcome) {
        let last = match outcome {
            Outcome::Completed => Some(CycleState::Completed),
            Outcome::Expired => Some(CycleState::Expired),
            Outcome::Failed => None,
        };
        if let Some(last) = last {
            *self.last_outcome.lock().unwrap_or_else(|e| e.into_inner()) = Some(last);
        }
        self.set_state(if self.armed.load(Ordering::Relaxed) {
            CycleState::Scheduled
        } else {
            CycleState::Idle
        });

        // Counters last, so observers never see a count ahead of the state.
        let counter = match outcome {
            Outcome::Completed => &self.cycles_completed,
            Outcome::Expired => &self.cycles_expired,
            Outcome::Failed => &self.cycles_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// How a spawned cycle ended.
#[derive(Debug, Clone, Copy)]
enum Outcome {
    Completed,
    Expired,
    Failed,
}

/// Point-in-time copy of [`SchedulerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub state: CycleState,
    pub last_outcome: Option<CycleState>,
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub cycles_expired: u64,
    pub cycles_failed: u64,
    pub triggers_dropped: u64,
    pub background_submissions: u64,
}

/// Drives the triage pipeline from every trigger source.
pub struct Scheduler {
    pipeline: Arc<TriagePipeline>,
    platform: Arc<dyn TaskPlatform>,
    settings: watch::Receiver<SchedulerSettings>,
    triggers: mpsc::Receiver<Trigger>,
    slot: Arc<Semaphore>,
    stats: Arc<SchedulerStats>,
}

impl Scheduler {
    pub fn new(
        pipeline: Arc<TriagePipeline>,
        platform: Arc<dyn TaskPlatform>,
        settings: watch::Receiver<SchedulerSettings>,
        triggers: mpsc::Receiver<Trigger>,
    ) -> Self {
        Self {
            pipeline,
            platform,
            settings,
            triggers,
            slot: Arc::new(Semaphore::new(1)),
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    /// Run until `shutdown` fires, then wait for the in-flight cycle.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut current = self.settings.borrow_and_update().clone();
        if current.background_updates {
            self.enable_background(&current);
        }
        self.stats.set_armed(current.armed());

        let mut ticker = foreground_ticker(current.refresh_interval);
        let mut settings_open = true;
        let mut triggers_open = true;

        info!(
            auto_refresh = current.auto_refresh,
            background_updates = current.background_updates,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick(), if current.auto_refresh => {
                    self.dispatch(Trigger::ForegroundTimer, &current, &shutdown);
                }
                trigger = self.triggers.recv(), if triggers_open => match trigger {
                    Some(trigger) => self.dispatch(trigger, &current, &shutdown),
                    None => {
                        debug!("Trigger channel closed");
                        triggers_open = false;
                    }
                },
                changed = self.settings.changed(), if settings_open => {
                    if changed.is_err() {
                        debug!("Settings channel closed, keeping current settings");
                        settings_open = false;
                        continue;
                    }
                    let next = self.settings.borrow_and_update().clone();
                    self.apply_settings(&current, &next, &mut ticker);
                    current = next;
                }
            }
        }

        info!("Scheduler stopping");
        // Shutdown cancels the in-flight cycle; wait for it to unwind.
        let _ = self.slot.acquire().await;
    }

    fn apply_settings(
        &self,
        current: &SchedulerSettings,
        next: &SchedulerSettings,
        ticker: &mut Interval,
    ) {
        if next.refresh_interval != current.refresh_interval
            || (next.auto_refresh && !current.auto_refresh)
        {
            *ticker = foreground_ticker(next.refresh_interval);
        }

        match (current.background_updates, next.background_updates) {
            (false, true) => {
                info!("Background updates enabled");
                self.enable_background(next);
            }
            (true, false) => {
                info!("Background updates disabled");
                if let Err(e) = self.platform.cancel(BACKGROUND_TASK_ID) {
                    warn!("Failed to cancel background task: {e}");
                }
            }
            _ => {}
        }

        self.stats.set_armed(next.armed());
    }

    fn enable_background(&self, settings: &SchedulerSettings) {
        match self.platform.register(BACKGROUND_TASK_ID) {
            Ok(()) => self.schedule_background(settings),
            Err(e) => warn!("Failed to register background task: {e}"),
        }
    }

    /// Ask the platform for the next background invocation.
    fn schedule_background(&self, settings: &SchedulerSettings) {
        if !settings.background_updates {
            return;
        }

        let delay = chrono::Duration::from_std(settings.background_delay)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let earliest = Utc::now() + delay;

        match self.platform.submit(BACKGROUND_TASK_ID, earliest) {
            Ok(()) => {
                self.stats
                    .background_submissions
                    .fetch_add(1, Ordering::Relaxed);
                debug!(%earliest, "Next background refresh scheduled");
            }
            Err(e) => warn!("Failed to schedule background refresh: {e}"),
        }
    }

    fn dispatch(&self, trigger: Trigger, settings: &SchedulerSettings, shutdown: &CancellationToken) {
        let label = trigger.label();

        if let Trigger::Background(_) = &trigger {
            if !settings.background_updates {
                info!("Background updates disabled, ignoring invocation");
                return;
            }
            // Before anything else, so a failed cycle still has a next wake-up.
            self.schedule_background(settings);
        }

        let permit = match Arc::clone(&self.slot).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.stats.triggers_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(trigger = label, "Triage cycle already running, dropping trigger");
                return;
            }
        };

        let lookback = trigger.lookback(&settings.lookback);
        let expiration = match trigger {
            Trigger::Background(invocation) => Some(invocation.expiration),
            _ => None,
        };

        self.stats.start_cycle();
        debug!(trigger = label, lookback = %lookback, "Starting triage cycle");

        let pipeline = Arc::clone(&self.pipeline);
        let stats = Arc::clone(&self.stats);
        let cancel = shutdown.child_token();

        tokio::spawn(async move {
            let _permit = permit;
            let _guard = cancel.clone().drop_guard();

            if let Some(expiration) = expiration {
                let cycle = cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = expiration.cancelled() => cycle.cancel(),
                        _ = cycle.cancelled() => {}
                    }
                });
            }

            let outcome = match pipeline.run_cycle(lookback, &cancel).await {
                Ok(report) => {
                    debug!(trigger = label, source = ?report.source, "Triage cycle completed");
                    Outcome::Completed
                }
                Err(CycleError::Expired) => {
                    info!(trigger = label, "Triage cycle expired, nothing recorded");
                    Outcome::Expired
                }
                Err(e) => {
                    error!(trigger = label, "Triage cycle failed: {e}");
                    Outcome::Failed
                }
            };
            stats.finish_cycle(outcome);
        });
    }
}

/// Repeating timer whose first tick is one period from now.
fn foreground_ticker(period: Duration) -> Interval {
    let period = period.max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookback_per_trigger() {
        let lookbacks = LookbackConfig::default();
        assert_eq!(Trigger::ForegroundTimer.lookback(&lookbacks), Lookback::hours(1));
        assert_eq!(
            Trigger::Background(BackgroundInvocation::new("t")).lookback(&lookbacks),
            Lookback::hours(12)
        );
        assert_eq!(Trigger::Manual.lookback(&lookbacks), Lookback::hours(24));
        assert_eq!(Trigger::SourceUpdated.lookback(&lookbacks), Lookback::hours(24));
    }

    #[test]
    fn test_stats_state_transitions() {
        let stats = SchedulerStats::default();
        assert_eq!(stats.state(), CycleState::Idle);

        stats.set_armed(true);
        assert_eq!(stats.state(), CycleState::Scheduled);

        stats.start_cycle();
        assert_eq!(stats.state(), CycleState::Running);
        // Arming changes never mask a running cycle.
        stats.set_armed(false);
        assert_eq!(stats.state(), CycleState::Running);

        stats.finish_cycle(Outcome::Expired);
        assert_eq!(stats.state(), CycleState::Idle);
        assert_eq!(stats.last_outcome(), Some(CycleState::Expired));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.cycles_started, 1);
        assert_eq!(snapshot.cycles_expired, 1);
        assert_eq!(snapshot.cycles_completed, 0);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.auto_refresh = false;
        let settings = SchedulerSettings::from(&config);
        assert!(!settings.auto_refresh);
        assert!(settings.background_updates);
        assert!(settings.armed());
    }
}
