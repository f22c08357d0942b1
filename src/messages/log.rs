//! Append-only conversational message log.
//!
//! The log is loaded once at startup and rewritten in full after every
//! append. Each rewrite starts from the stored copy, read under the store's
//! update lock, so entries written meanwhile by another process (a CLI
//! `chat` next to a running agent) are kept. Missing or corrupt persisted
//! data yields an empty log rather than an error, so a damaged blob can
//! never stop the agent from starting.

use crate::messages::message::{Message, Origin};
use crate::messages::store::{KeyValueStore, MemoryStore};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Key the log is persisted under.
pub const MESSAGES_KEY: &str = "chat_messages";

/// Capacity of the new-entry broadcast channel.
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Message log errors.
#[derive(Debug)]
pub enum LogError {
    /// The persistence collaborator failed
    Io(String),
    /// The log could not be serialized
    Serialize(String),
    /// The background persistence worker failed
    Worker(String),
}

impl std::fmt::Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogError::Io(e) => write!(f, "Message log IO error: {e}"),
            LogError::Serialize(e) => write!(f, "Message log serialize error: {e}"),
            LogError::Worker(e) => write!(f, "Message log worker error: {e}"),
        }
    }
}

impl std::error::Error for LogError {}

/// Ordered, persisted sequence of messages.
pub struct MessageLog {
    /// Entries in append order
    messages: Mutex<Vec<Message>>,
    /// Persistence collaborator
    store: Arc<dyn KeyValueStore>,
    /// Key the whole log is stored under
    key: String,
    /// Notifies observers of newly appended entries
    updates: broadcast::Sender<Message>,
}

impl MessageLog {
    /// Load the log stored under [`MESSAGES_KEY`].
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        Self::load_key(store, MESSAGES_KEY)
    }

    /// Load the log stored under a custom key.
    pub fn load_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let messages = match Self::read(store.as_ref(), &key) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(key = %key, "Could not load message log, starting empty: {e}");
                Vec::new()
            }
        };
        debug!(key = %key, count = messages.len(), "Message log loaded");

        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            messages: Mutex::new(messages),
            store,
            key,
            updates,
        }
    }

    /// Create an empty log that is never written to disk.
    pub fn in_memory() -> Self {
        Self::load(Arc::new(MemoryStore::new()))
    }

    fn read(store: &dyn KeyValueStore, key: &str) -> Result<Vec<Message>, LogError> {
        match store.get(key).map_err(|e| LogError::Io(e.to_string()))? {
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| LogError::Serialize(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    /// Apply `edit` to the latest stored log, write it back and return it.
    ///
    /// `fallback` stands in for the stored copy when there is none or it is
    /// unreadable.
    fn persist_with(
        &self,
        fallback: &[Message],
        edit: impl Fn(&mut Vec<Message>),
    ) -> Result<Vec<Message>, LogError> {
        let mut merged = None;
        let mut encode_error = None;

        let result = self.store.update(&self.key, &mut |current| {
            let mut latest = match current
                .as_deref()
                .map(serde_json::from_slice::<Vec<Message>>)
            {
                Some(Ok(latest)) => latest,
                Some(Err(e)) => {
                    warn!(key = %self.key, "Stored message log unreadable, rewriting it: {e}");
                    fallback.to_vec()
                }
                None => fallback.to_vec(),
            };
            edit(&mut latest);

            let bytes = serde_json::to_vec(&latest).map_err(|e| {
                encode_error = Some(e.to_string());
                io::Error::new(io::ErrorKind::InvalidData, "message log not serializable")
            })?;
            merged = Some(latest);
            Ok(bytes)
        });

        match (result, encode_error) {
            (_, Some(e)) => Err(LogError::Serialize(e)),
            (Err(e), None) => Err(LogError::Io(e.to_string())),
            (Ok(()), None) => Ok(merged.unwrap_or_default()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Message>> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one message and persist the whole log.
    pub fn append(&self, message: Message) -> Result<(), LogError> {
        self.append_all(vec![message])
    }

    /// Append several messages, in order, with a single persist.
    ///
    /// Either every message is durably appended or none is: on a persistence
    /// failure the in-memory log is left as it was and the error returned.
    /// On success the in-memory log also picks up entries other writers
    /// stored since the last append.
    pub fn append_all(&self, batch: Vec<Message>) -> Result<(), LogError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut messages = self.entries();
        let latest = self.persist_with(&messages, |latest| latest.extend(batch.iter().cloned()))?;
        *messages = latest;
        drop(messages);

        for message in batch {
            // No receivers is fine.
            let _ = self.updates.send(message);
        }
        Ok(())
    }

    /// Empty both the in-memory and the persisted log.
    pub fn clear(&self) -> Result<(), LogError> {
        let mut messages = self.entries();
        *messages = self.persist_with(&messages, |latest| latest.clear())?;
        Ok(())
    }

    /// Copy of all messages in append order.
    pub fn messages(&self) -> Vec<Message> {
        self.entries().clone()
    }

    /// The most recent `n` messages, oldest first.
    pub fn tail(&self, n: usize) -> Vec<Message> {
        let messages = self.entries();
        let start = messages.len().saturating_sub(n);
        messages[start..].to_vec()
    }

    /// The most recent message.
    pub fn last(&self) -> Option<Message> {
        self.entries().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Subscribe to entries appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.updates.subscribe()
    }

    /// Get the current statistics.
    pub fn stats(&self) -> LogStats {
        let messages = self.entries();
        let count = |origin: Origin| messages.iter().filter(|m| m.origin == origin).count();

        LogStats {
            total: messages.len(),
            user: count(Origin::User),
            ai: count(Origin::Ai),
            system: count(Origin::System),
            with_health_data: messages.iter().filter(|m| m.health_data.is_some()).count(),
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Message Log:\n\
             - Total messages: {}\n\
             - From you: {}\n\
             - Analyses: {}\n\
             - Device notices: {}\n\
             - Health snapshots attached: {}",
            stats.total, stats.user, stats.ai, stats.system, stats.with_health_data
        )
    }
}

/// Snapshot of message log statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStats {
    pub total: usize,
    pub user: usize,
    pub ai: usize,
    pub system: usize,
    pub with_health_data: usize,
}

/// Thread-safe shared message log.
pub type SharedMessageLog = Arc<MessageLog>;

/// Load a shared message log from a persistence collaborator.
pub fn create_shared_log(store: Arc<dyn KeyValueStore>) -> SharedMessageLog {
    Arc::new(MessageLog::load(store))
}
