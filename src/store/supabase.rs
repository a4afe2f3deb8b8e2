//! Thread rows stored in a Supabase table through its PostgREST API.

use async_trait::async_trait;
use tracing::debug;

use super::ThreadStore;
use crate::config::StoreConfig;
use crate::error::{ChatError, Result};
use crate::message::{NewThreadRecord, ThreadRecord};

/// PostgREST-backed [`ThreadStore`].
pub struct SupabaseThreadStore {
    base_url: String,
    api_key: String,
    table: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for SupabaseThreadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseThreadStore")
            .field("base_url", &self.base_url)
            .field("table", &self.table)
            .finish()
    }
}

impl SupabaseThreadStore {
    /// Create a store for `base_url` authenticated with `api_key`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
            table: table.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from config, or `None` when the URL or key is missing.
    pub fn from_config(config: &StoreConfig) -> Option<Self> {
        let url = config.supabase_url.as_deref()?;
        let key = config.supabase_key.as_deref()?;
        Some(Self::new(url, key, config.table.clone()))
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }
}

#[async_trait]
impl ThreadStore for SupabaseThreadStore {
    async fn insert(&self, record: &NewThreadRecord) -> Result<()> {
        let response = self
            .authorized(self.client.post(self.table_url()))
            .header("Prefer", "return=minimal")
            .json(&[record])
            .send()
            .await
            .map_err(|e| ChatError::Persistence(format!("insert request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Persistence(format!(
                "insert into {} failed with HTTP {}: {body}",
                self.table,
                status.as_u16()
            )));
        }
        debug!(thread_id = %record.thread_id, "thread row inserted");
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ThreadRecord>> {
        let user_filter = format!("eq.{user_id}");
        let response = self
            .authorized(self.client.get(self.table_url()))
            .query(&[
                ("select", "*"),
                ("user_id", user_filter.as_str()),
                ("order", "created_at.desc"),
            ])
            .send()
            .await
            .map_err(|e| ChatError::Persistence(format!("list request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ChatError::Persistence(format!("list body unreadable: {e}")))?;
        if !status.is_success() {
            return Err(ChatError::Persistence(format!(
                "list {} failed with HTTP {}: {body}",
                self.table,
                status.as_u16()
            )));
        }
        serde_json::from_str(&body)
            .map_err(|e| ChatError::Persistence(format!("malformed thread rows: {e}")))
    }
}
