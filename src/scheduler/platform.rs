//! Platform background-task scheduling.
//!
//! The OS facility that wakes the agent for background refreshes is an
//! external collaborator. [`TaskPlatform`] is the interface the scheduler
//! needs from it; [`LocalTaskPlatform`] is a tokio-backed stand-in that
//! delivers invocations over the scheduler's trigger channel.

use super::runner::Trigger;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identifier the refresh task is registered under.
pub const BACKGROUND_TASK_ID: &str = "vitals.triage.refresh";

/// Platform scheduling errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformError {
    /// Submit or cancel for a task that was never registered
    NotRegistered(String),
    /// The platform refused the request
    Rejected(String),
}

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformError::NotRegistered(id) => write!(f, "Background task not registered: {id}"),
            PlatformError::Rejected(e) => write!(f, "Background task request rejected: {e}"),
        }
    }
}

impl std::error::Error for PlatformError {}

/// A background invocation handed to the scheduler.
///
/// `expiration` fires when the platform wants the work to stop.
#[derive(Debug, Clone)]
pub struct BackgroundInvocation {
    pub task_id: String,
    pub expiration: CancellationToken,
}

impl BackgroundInvocation {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            expiration: CancellationToken::new(),
        }
    }

    /// Fire the expiration signal.
    pub fn expire(&self) {
        self.expiration.cancel();
    }
}

/// Background scheduling facility.
pub trait TaskPlatform: Send + Sync {
    /// Register the handler for a task id.
    fn register(&self, task_id: &str) -> Result<(), PlatformError>;

    /// Request one invocation no earlier than `earliest`.
    ///
    /// Replaces any pending request for the same task.
    fn submit(&self, task_id: &str, earliest: DateTime<Utc>) -> Result<(), PlatformError>;

    /// Withdraw any pending request for a task.
    fn cancel(&self, task_id: &str) -> Result<(), PlatformError>;
}

/// In-process platform driven by tokio timers.
///
/// Must be used from within a tokio runtime.
pub struct LocalTaskPlatform {
    triggers: mpsc::Sender<Trigger>,
    budget: Duration,
    registered: Mutex<HashSet<String>>,
    pending: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl LocalTaskPlatform {
    /// Create a platform delivering invocations to `triggers`, each expiring
    /// `budget` after delivery.
    pub fn new(triggers: mpsc::Sender<Trigger>, budget: Duration) -> Self {
        Self {
            triggers,
            budget,
            registered: Mutex::new(HashSet::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a request is waiting to fire.
    pub fn has_pending(&self, task_id: &str) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.get(task_id).is_some_and(|h| !h.is_finished())
    }

    fn ensure_registered(&self, task_id: &str) -> Result<(), PlatformError> {
        let registered = self.registered.lock().unwrap_or_else(|e| e.into_inner());
        if registered.contains(task_id) {
            Ok(())
        } else {
            Err(PlatformError::NotRegistered(task_id.to_string()))
        }
    }
}

impl TaskPlatform for LocalTaskPlatform {
    fn register(&self, task_id: &str) -> Result<(), PlatformError> {
        let mut registered = self.registered.lock().unwrap_or_else(|e| e.into_inner());
        registered.insert(task_id.to_string());
        Ok(())
    }

    fn submit(&self, task_id: &str, earliest: DateTime<Utc>) -> Result<(), PlatformError> {
        self.ensure_registered(task_id)?;

        let delay = (earliest - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let triggers = self.triggers.clone();
        let budget = self.budget;
        let id = task_id.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let invocation = BackgroundInvocation::new(id);
            let expiration = invocation.expiration.clone();
            // The expiry timer outlives this task, which a resubmit may abort.
            tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                expiration.cancel();
            });

            if triggers.send(Trigger::Background(invocation)).await.is_err() {
                debug!("Scheduler gone, background invocation discarded");
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pending.insert(task_id.to_string(), handle) {
            previous.abort();
        }
        debug!(task_id, delay_secs = delay.as_secs(), "Background task submitted");
        Ok(())
    }

    fn cancel(&self, task_id: &str) -> Result<(), PlatformError> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = pending.remove(task_id) {
            handle.abort();
            debug!(task_id, "Background task cancelled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_submit_requires_registration() {
        let (tx, _rx) = mpsc::channel(4);
        let platform = LocalTaskPlatform::new(tx, Duration::from_secs(1));

        let result = platform.submit(BACKGROUND_TASK_ID, Utc::now());
        assert!(matches!(result, Err(PlatformError::NotRegistered(_))));
    }

    #[tokio::test]
    async fn test_invocation_is_delivered_then_expires() {
        let (tx, mut rx) = mpsc::channel(4);
        let platform = LocalTaskPlatform::new(tx, Duration::from_millis(50));
        platform.register(BACKGROUND_TASK_ID).unwrap();
        platform.submit(BACKGROUND_TASK_ID, Utc::now()).unwrap();

        let trigger = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let Trigger::Background(invocation) = trigger else {
            panic!("expected a background trigger");
        };
        assert_eq!(invocation.task_id, BACKGROUND_TASK_ID);
        assert!(!invocation.expiration.is_cancelled());

        tokio::time::timeout(Duration::from_secs(2), invocation.expiration.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_resubmit_replaces_pending_request() {
        let (tx, mut rx) = mpsc::channel(4);
        let platform = LocalTaskPlatform::new(tx, Duration::from_secs(60));
        platform.register(BACKGROUND_TASK_ID).unwrap();

        let soon = Utc::now() + chrono::Duration::milliseconds(100);
        platform.submit(BACKGROUND_TASK_ID, soon).unwrap();
        platform.submit(BACKGROUND_TASK_ID, Utc::now()).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(matches!(first, Ok(Some(Trigger::Background(_)))));

        let second = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(second.is_err(), "replaced request must not fire");
    }

    #[tokio::test]
    async fn test_cancel_withdraws_request() {
        let (tx, mut rx) = mpsc::channel(4);
        let platform = LocalTaskPlatform::new(tx, Duration::from_secs(60));
        platform.register(BACKGROUND_TASK_ID).unwrap();
        platform
            .submit(BACKGROUND_TASK_ID, Utc::now() + chrono::Duration::milliseconds(100))
            .unwrap();
        assert!(platform.has_pending(BACKGROUND_TASK_ID));

        platform.cancel(BACKGROUND_TASK_ID).unwrap();
        assert!(!platform.has_pending(BACKGROUND_TASK_ID));

        let received = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(received.is_err(), "cancelled request must not fire");
    }
}
