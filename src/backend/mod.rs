//! Conversation backend: thread lifecycle and run execution.
//!
//! The backend is a remote, run-oriented chat API. A *thread* is a
//! server-side conversation; a *run* takes one user turn and returns the
//! turns the agent produced for it (possibly several, when the agent plans
//! in multiple steps).
//!
//! Message content arrives either as a plain string or as a list of typed
//! parts. [`MessageContent`] decodes both into a tagged union, keeping any
//! other shape as [`MessageContent::Unrecognized`] so callers hit an explicit
//! error branch instead of probing JSON by hand.

pub mod langgraph;

pub use langgraph::LangGraphBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::error::{ChatError, Result};
use crate::message::ThreadId;

/// Remote conversation API.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// Ask the backend for a new thread.
    async fn create_thread(&self) -> Result<ThreadId>;

    /// Run the assistant on `thread` with a single user turn and wait for
    /// the resulting messages.
    async fn run_wait(&self, thread: &ThreadId, text: &str) -> Result<Vec<BackendMessage>>;

    /// Fetch every message persisted on `thread`.
    async fn thread_state(&self, thread: &ThreadId) -> Result<Vec<BackendMessage>>;
}

/// Role tag carried in a message's `type` field.
///
/// A missing or non-string tag decodes as `Other` with the raw tag text
/// (empty when absent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Human,
    Ai,
    System,
    Tool,
    Other(String),
}

impl Default for MessageKind {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl From<String> for MessageKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "human" => Self::Human,
            "ai" => Self::Ai,
            "system" => Self::System,
            "tool" => Self::Tool,
            _ => Self::Other(tag),
        }
    }
}

impl MessageKind {
    fn from_value(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(tag) => Self::from(tag.clone()),
            serde_json::Value::Null => Self::default(),
            other => Self::Other(other.to_string()),
        }
    }
}

/// One typed part of a multi-part message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Decoded message content.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    Unrecognized(serde_json::Value),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Unrecognized(serde_json::Value::Null)
    }
}

impl MessageContent {
    /// Decode a raw JSON content value.
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Self::Text(text),
            serde_json::Value::Array(_) => match Vec::<ContentPart>::deserialize(&value) {
                Ok(parts) => Self::Parts(parts),
                Err(_) => Self::Unrecognized(value),
            },
            other => Self::Unrecognized(other),
        }
    }

    /// Displayable text: the string itself, or the first text part.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::UnrecognizedContent`] for any other shape.
    pub fn text(&self) -> Result<String> {
        match self {
            Self::Text(text) => Ok(text.clone()),
            Self::Parts(parts) => Ok(parts
                .iter()
                .find_map(|part| match part {
                    ContentPart::Text { text } => Some(text.clone()),
                    ContentPart::Other => None,
                })
                .unwrap_or_default()),
            Self::Unrecognized(raw) => Err(ChatError::UnrecognizedContent(truncate_json(raw))),
        }
    }
}

impl<'de> Deserialize<'de> for MessageContent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from_value)
    }
}

/// A message as returned by runs and thread state.
///
/// Decoding never fails on a single item: an item that is not an object
/// keeps its raw value as unrecognized content, so only a reply that is
/// actually chosen for display can surface a decode error.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendMessage {
    pub kind: MessageKind,
    pub content: MessageContent,
    pub timestamp: Option<DateTime<Utc>>,
}

impl BackendMessage {
    /// Build a message with plain text content.
    pub fn text(kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            content: MessageContent::Text(text.into()),
            timestamp: None,
        }
    }

    /// Decode one raw message item.
    pub fn from_value(value: serde_json::Value) -> Self {
        let serde_json::Value::Object(mut fields) = value else {
            return Self {
                kind: MessageKind::default(),
                content: MessageContent::Unrecognized(value),
                timestamp: None,
            };
        };
        let kind = fields
            .get("type")
            .map(MessageKind::from_value)
            .unwrap_or_default();
        let timestamp = fields
            .get("timestamp")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let content = fields
            .remove("content")
            .map(MessageContent::from_value)
            .unwrap_or_default();
        Self {
            kind,
            content,
            timestamp,
        }
    }
}

impl<'de> Deserialize<'de> for BackendMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from_value)
    }
}

/// Pick the user-visible reply out of a run's messages.
///
/// Only the last assistant-tagged message counts; earlier ones are
/// intermediate planning steps. Returns `Ok(None)` when there is no
/// assistant message or its text is blank.
///
/// # Errors
///
/// Returns [`ChatError::UnrecognizedContent`] if the chosen message's
/// content cannot be decoded.
pub fn last_assistant_text(messages: &[BackendMessage]) -> Result<Option<String>> {
    let Some(last) = messages.iter().rev().find(|m| m.kind == MessageKind::Ai) else {
        return Ok(None);
    };
    let text = last.content.text()?;
    if text.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

fn truncate_json(raw: &serde_json::Value) -> String {
    let mut s = raw.to_string();
    if s.len() > 120 {
        let cut = (0..=120).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0);
        s.truncate(cut);
        s.push('…');
    }
    s
}
