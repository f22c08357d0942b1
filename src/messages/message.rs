//! Conversational log entries.

use crate::core::windowing::SampleStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    User,
    Ai,
    System,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::User => write!(f, "user"),
            Origin::Ai => write!(f, "ai"),
            Origin::System => write!(f, "system"),
        }
    }
}

/// One entry in the message log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub origin: Origin,
    /// Snapshot of the windows this message refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_data: Option<SampleStore>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(origin: Origin, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            origin,
            health_data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Origin::User, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(Origin::Ai, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Origin::System, content)
    }

    /// Attach a health-data snapshot.
    pub fn with_health_data(mut self, store: SampleStore) -> Self {
        self.health_data = Some(store);
        self
    }
}
