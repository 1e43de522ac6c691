//! Thread Correlation Store
//!
//! Maps an outbound email thread id to the chat context that produced it.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use legalrelay_models::ThreadCorrelationEntry;

use crate::redis::RedisPool;

#[async_trait]
pub trait ThreadCorrelationStore: Send + Sync {
    /// Stores `entry` under its `thread_id`, replacing any previous entry.
    async fn put(&self, entry: ThreadCorrelationEntry) -> Result<()>;

    /// A miss is `Ok(None)`, never an error.
    async fn get(&self, thread_id: &str) -> Result<Option<ThreadCorrelationEntry>>;

    async fn delete(&self, thread_id: &str) -> Result<bool>;

    /// Drops entries created before `cutoff`, returning how many were removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

#[derive(Default)]
pub struct InMemoryCorrelationStore {
    entries: RwLock<HashMap<String, ThreadCorrelationEntry>>,
}

impl InMemoryCorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ThreadCorrelationStore for InMemoryCorrelationStore {
    async fn put(&self, entry: ThreadCorrelationEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(entry.thread_id.clone(), entry);
        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<ThreadCorrelationEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.get(thread_id).cloned())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(thread_id).is_some())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at >= cutoff);
        Ok(before - entries.len())
    }
}

/// Redis-backed store; keys expire on their own after `ttl_seconds`.
pub struct RedisCorrelationStore {
    pool: RedisPool,
    key_prefix: String,
    ttl_seconds: u64,
}

impl RedisCorrelationStore {
    pub fn new(pool: RedisPool, ttl_seconds: u64) -> Self {
        Self {
            pool,
            key_prefix: "legalrelay:thread:".to_string(),
            ttl_seconds,
        }
    }

    fn key(&self, thread_id: &str) -> String {
        format!("{}{}", self.key_prefix, thread_id)
    }
}

#[async_trait]
impl ThreadCorrelationStore for RedisCorrelationStore {
    async fn put(&self, entry: ThreadCorrelationEntry) -> Result<()> {
        let value = serde_json::to_string(&entry)?;
        let mut con = self.pool.clone();

        let _: () = redis::cmd("SET")
            .arg(self.key(&entry.thread_id))
            .arg(value)
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut con)
            .await
            .context("Failed to store thread correlation")?;

        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<ThreadCorrelationEntry>> {
        let mut con = self.pool.clone();

        let value: Option<String> = redis::cmd("GET")
            .arg(self.key(thread_id))
            .query_async(&mut con)
            .await
            .context("Failed to fetch thread correlation")?;

        match value {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("Corrupt thread correlation entry")?,
            )),
            None => Ok(None),
        }
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        let mut con = self.pool.clone();

        let removed: i64 = redis::cmd("DEL")
            .arg(self.key(thread_id))
            .query_async(&mut con)
            .await
            .context("Failed to delete thread correlation")?;

        Ok(removed > 0)
    }

    async fn purge_older_than(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
        // Keys carry their own expiry.
        Ok(0)
    }
}
