//! Identity Store
//!
//! Email address lookups across the attorney and client tables.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;

use legalrelay_models::{IdentityRecord, IdentityTable};

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find(&self, table: IdentityTable, id: &str) -> Result<Option<IdentityRecord>>;
}

pub struct PostgresIdentityStore {
    pool: PgPool,
}

impl PostgresIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PostgresIdentityStore {
    async fn find(&self, table: IdentityTable, id: &str) -> Result<Option<IdentityRecord>> {
        let query = match table {
            IdentityTable::Attorneys => {
                "SELECT id, email, name, firm_name FROM attorneys WHERE id = $1"
            }
            IdentityTable::Users => {
                "SELECT id, email, name, NULL::VARCHAR AS firm_name FROM users WHERE id = $1"
            }
        };

        let record: Option<IdentityRecord> = sqlx::query_as(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to fetch identity from {}", table.table_name()))?;

        Ok(record)
    }
}

#[derive(Default)]
pub struct InMemoryIdentityStore {
    records: RwLock<HashMap<(IdentityTable, String), IdentityRecord>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, table: IdentityTable, record: IdentityRecord) {
        let mut records = self.records.write().await;
        records.insert((table, record.id.clone()), record);
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find(&self, table: IdentityTable, id: &str) -> Result<Option<IdentityRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&(table, id.to_string())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_is_per_table() {
        let store = InMemoryIdentityStore::new();
        store
            .insert(
                IdentityTable::Users,
                IdentityRecord {
                    id: "client1".to_string(),
                    email: Some("client@x.com".to_string()),
                    ..Default::default()
                },
            )
            .await;

        let found = store.find(IdentityTable::Users, "client1").await.unwrap();
        assert_eq!(found.unwrap().email.as_deref(), Some("client@x.com"));
        assert!(store.find(IdentityTable::Attorneys, "client1").await.unwrap().is_none());
    }
}
