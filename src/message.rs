//! Transcript and thread data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Greeting shown at the start of every fresh or unloadable conversation.
pub const GREETING: &str = "Hello! How can I help you today?";

/// Reply used when the backend answered but produced no assistant text.
pub const NO_REPLY_FALLBACK: &str = "Sorry, I couldn't get a response from the bot.";

/// Reply used when the backend call itself failed.
pub const BACKEND_ERROR_APOLOGY: &str =
    "Oops! Something went wrong with the API call. Please check your connection and try again!";

/// Title given to a freshly created thread.
pub const NEW_CHAT_TITLE: &str = "New Chat";

/// Placeholder summary for a thread with no turns yet.
pub const NEW_CHAT_SUMMARY: &str = "Start a conversation...";

/// Id of the built-in welcome entry.
pub const WELCOME_CHAT_ID: &str = "1";

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
    /// Only produced when reconstructing persisted thread state.
    System,
}

/// One transcript entry. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message with a fresh unique id.
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            sender,
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Sender::Assistant, text)
    }

    /// The canned greeting message.
    pub fn greeting() -> Self {
        Self {
            id: "greeting".into(),
            text: GREETING.into(),
            sender: Sender::Assistant,
            timestamp: Utc::now(),
        }
    }
}

/// Opaque conversation id issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lightweight index entry used to list conversations.
///
/// `thread_id` is `None` for degraded entries created while the backend
/// was unreachable; selecting one always resets to the greeting.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatHistoryEntry {
    pub id: String,
    pub title: String,
    pub last_message: String,
    pub timestamp: DateTime<Utc>,
    pub thread_id: Option<ThreadId>,
}

impl ChatHistoryEntry {
    /// The built-in entry present before any history is loaded.
    pub fn welcome() -> Self {
        Self {
            id: WELCOME_CHAT_ID.into(),
            title: "Welcome Chat".into(),
            last_message: GREETING.into(),
            timestamp: Utc::now(),
            thread_id: None,
        }
    }

    /// Entry for a chat started in this session.
    pub fn new_chat(thread_id: Option<ThreadId>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: NEW_CHAT_TITLE.into(),
            last_message: NEW_CHAT_SUMMARY.into(),
            timestamp: Utc::now(),
            thread_id,
        }
    }
}

/// Persisted thread row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub thread_id: String,
    pub user_id: String,
    pub title: String,
    pub last_message: String,
    pub created_at: DateTime<Utc>,
}

impl From<ThreadRecord> for ChatHistoryEntry {
    fn from(row: ThreadRecord) -> Self {
        Self {
            id: row.thread_id.clone(),
            title: row.title,
            last_message: row.last_message,
            timestamp: row.created_at,
            thread_id: Some(ThreadId::new(row.thread_id)),
        }
    }
}

/// Thread row as inserted; the store assigns `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewThreadRecord {
    pub thread_id: String,
    pub user_id: String,
    pub title: String,
    pub last_message: String,
}

impl NewThreadRecord {
    /// Row for a thread that has no turns yet.
    pub fn fresh(thread_id: &ThreadId, user_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.as_str().to_owned(),
            user_id: user_id.into(),
            title: NEW_CHAT_TITLE.into(),
            last_message: NEW_CHAT_SUMMARY.into(),
        }
    }
}
