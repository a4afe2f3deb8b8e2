//! HTTP client for a LangGraph-style threads/runs API.
//!
//! - `POST /threads` creates a thread.
//! - `POST /threads/{id}/runs/wait` runs the assistant and blocks until done.
//! - `GET /threads/{id}/state` returns the thread's persisted values.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{BackendMessage, ConversationBackend};
use crate::config::BackendConfig;
use crate::error::{ChatError, Result};
use crate::message::ThreadId;

/// Conversation backend reached over HTTP.
pub struct LangGraphBackend {
    base_url: String,
    assistant_id: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for LangGraphBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LangGraphBackend")
            .field("base_url", &self.base_url)
            .field("assistant_id", &self.assistant_id)
            .finish()
    }
}

#[derive(Deserialize)]
struct CreatedThread {
    thread_id: String,
}

#[derive(Deserialize)]
struct RunOutput {
    #[serde(default)]
    messages: Vec<BackendMessage>,
}

#[derive(Deserialize)]
struct ThreadState {
    #[serde(default)]
    values: Option<StateValues>,
}

#[derive(Deserialize)]
struct StateValues {
    #[serde(default)]
    messages: Vec<BackendMessage>,
}

impl LangGraphBackend {
    /// Create a client for the configured base URL and assistant.
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            base_url: config.api_url.trim_end_matches('/').to_owned(),
            assistant_id: config.assistant_id.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Check the status and decode a JSON body.
    async fn read_json<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ChatError::Network(format!(
                "{what} failed with HTTP {}: {body}",
                status.as_u16()
            )));
        }
        serde_json::from_str(&body)
            .map_err(|e| ChatError::UnrecognizedContent(format!("{what} response: {e}")))
    }
}

#[async_trait]
impl ConversationBackend for LangGraphBackend {
    async fn create_thread(&self) -> Result<ThreadId> {
        let response = self
            .client
            .post(self.url("/threads"))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let created: CreatedThread = Self::read_json(response, "create thread").await?;
        debug!(thread_id = %created.thread_id, "backend thread created");
        Ok(ThreadId::new(created.thread_id))
    }

    async fn run_wait(&self, thread: &ThreadId, text: &str) -> Result<Vec<BackendMessage>> {
        let body = serde_json::json!({
            "assistant_id": self.assistant_id,
            "input": {
                "messages": [{"role": "user", "content": text}],
            },
        });
        let response = self
            .client
            .post(self.url(&format!("/threads/{thread}/runs/wait")))
            .json(&body)
            .send()
            .await?;
        let output: RunOutput = Self::read_json(response, "run").await?;
        debug!(%thread, count = output.messages.len(), "run finished");
        Ok(output.messages)
    }

    async fn thread_state(&self, thread: &ThreadId) -> Result<Vec<BackendMessage>> {
        let response = self
            .client
            .get(self.url(&format!("/threads/{thread}/state")))
            .send()
            .await?;
        let state: ThreadState = Self::read_json(response, "thread state").await?;
        Ok(state.values.map(|v| v.messages).unwrap_or_default())
    }
}
