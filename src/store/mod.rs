//! Persisted thread index.
//!
//! Defines the [`ThreadStore`] trait and provides [`MemoryThreadStore`] for
//! tests and offline use. Rows only index threads; message bodies always
//! come from the conversation backend.

pub mod supabase;

pub use supabase::SupabaseThreadStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::message::{NewThreadRecord, ThreadRecord};

/// Async storage for thread rows.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Insert a new row.
    async fn insert(&self, record: &NewThreadRecord) -> Result<()>;

    /// All rows owned by `user_id`, newest first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ThreadRecord>>;
}

/// In-memory thread store. Cheaply cloneable; clones share rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryThreadStore {
    rows: Arc<RwLock<Vec<ThreadRecord>>>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a fully-formed row (including its creation time).
    pub async fn push(&self, record: ThreadRecord) {
        self.rows.write().await.push(record);
    }

    /// Number of stored rows across all users.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn insert(&self, record: &NewThreadRecord) -> Result<()> {
        let row = ThreadRecord {
            thread_id: record.thread_id.clone(),
            user_id: record.user_id.clone(),
            title: record.title.clone(),
            last_message: record.last_message.clone(),
            created_at: Utc::now(),
        };
        self.rows.write().await.push(row);
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ThreadRecord>> {
        let rows = self.rows.read().await;
        let mut owned: Vec<ThreadRecord> = rows
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }
}
