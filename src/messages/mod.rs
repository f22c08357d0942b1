//! Message log for the triage agent.
//!
//! The log is the conversational record the UI renders: user requests,
//! analyses, and device notices, each optionally carrying the health data
//! it refers to.

pub mod log;
pub mod message;
pub mod store;

// Re-export commonly used types
pub use log::{create_shared_log, LogError, LogStats, MessageLog, SharedMessageLog, MESSAGES_KEY};
pub use message::{Message, Origin};
pub use store::{FileStore, KeyValueStore, MemoryStore};
