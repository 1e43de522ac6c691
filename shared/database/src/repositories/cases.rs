//! Case Directory
//!
//! Resolves the case title a chat channel was opened for.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;

#[async_trait]
pub trait CaseDirectory: Send + Sync {
    async fn case_title(&self, channel_url: &str) -> Result<Option<String>>;
}

pub struct PostgresCaseDirectory {
    pool: PgPool,
}

impl PostgresCaseDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CaseDirectory for PostgresCaseDirectory {
    async fn case_title(&self, channel_url: &str) -> Result<Option<String>> {
        let title: Option<String> = sqlx::query_scalar(
            r#"
            SELECT s.title
            FROM case_interests ci
            JOIN ai_case_submissions s ON s.case_submission_id = ci.case_id
            WHERE ci.channel_url = $1 AND s.title IS NOT NULL AND s.title <> ''
            ORDER BY ci.id ASC
            LIMIT 1
            "#,
        )
        .bind(channel_url)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch case title")?;

        Ok(title)
    }
}

#[derive(Default)]
pub struct InMemoryCaseDirectory {
    titles: RwLock<HashMap<String, String>>,
}

impl InMemoryCaseDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, channel_url: impl Into<String>, title: impl Into<String>) {
        self.titles.write().await.insert(channel_url.into(), title.into());
    }
}

#[async_trait]
impl CaseDirectory for InMemoryCaseDirectory {
    async fn case_title(&self, channel_url: &str) -> Result<Option<String>> {
        Ok(self.titles.read().await.get(channel_url).cloned())
    }
}
