//! Webhook Event Store
//!
//! Processing records for received webhooks, queryable by type and status.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::doc,
    options::{FindOptions, ReplaceOptions},
    Collection,
};
use tokio::sync::RwLock;

use legalrelay_models::{ProcessingStatus, WebhookEvent, WebhookEventType};

use crate::mongodb::MongoDatabase;

#[async_trait]
pub trait WebhookEventStore: Send + Sync {
    async fn insert(&self, event: WebhookEvent) -> Result<()>;

    /// Replaces the stored record with the same id.
    async fn update(&self, event: &WebhookEvent) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<WebhookEvent>>;

    async fn find_by_type(&self, event_type: WebhookEventType) -> Result<Vec<WebhookEvent>>;

    async fn find_failed(&self) -> Result<Vec<WebhookEvent>>;
}

/// Process-lifetime store; records are never evicted.
#[derive(Default)]
pub struct InMemoryWebhookEventStore {
    events: RwLock<HashMap<String, WebhookEvent>>,
}

impl InMemoryWebhookEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn filtered<F>(&self, predicate: F) -> Vec<WebhookEvent>
    where
        F: Fn(&WebhookEvent) -> bool,
    {
        let events = self.events.read().await;
        let mut matching: Vec<WebhookEvent> =
            events.values().filter(|e| predicate(e)).cloned().collect();
        matching.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        matching
    }
}

#[async_trait]
impl WebhookEventStore for InMemoryWebhookEventStore {
    async fn insert(&self, event: WebhookEvent) -> Result<()> {
        let mut events = self.events.write().await;
        events.insert(event.id.clone(), event);
        Ok(())
    }

    async fn update(&self, event: &WebhookEvent) -> Result<()> {
        let mut events = self.events.write().await;
        events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<WebhookEvent>> {
        let events = self.events.read().await;
        Ok(events.get(id).cloned())
    }

    async fn find_by_type(&self, event_type: WebhookEventType) -> Result<Vec<WebhookEvent>> {
        Ok(self.filtered(|e| e.event_type == event_type).await)
    }

    async fn find_failed(&self) -> Result<Vec<WebhookEvent>> {
        Ok(self
            .filtered(|e| e.processing_status == ProcessingStatus::Failed)
            .await)
    }
}

pub struct MongoWebhookEventStore {
    collection: Collection<WebhookEvent>,
}

impl MongoWebhookEventStore {
    pub fn new(database: &MongoDatabase) -> Self {
        Self {
            collection: database.collection("webhook_events"),
        }
    }

    async fn find_sorted(&self, filter: mongodb::bson::Document) -> Result<Vec<WebhookEvent>> {
        let options = FindOptions::builder().sort(doc! { "timestamp": 1 }).build();
        let cursor = self
            .collection
            .find(filter, options)
            .await
            .context("Failed to query webhook events")?;

        cursor
            .try_collect()
            .await
            .context("Failed to read webhook events")
    }
}

#[async_trait]
impl WebhookEventStore for MongoWebhookEventStore {
    async fn insert(&self, event: WebhookEvent) -> Result<()> {
        self.collection
            .insert_one(event, None)
            .await
            .context("Failed to insert webhook event")?;
        Ok(())
    }

    async fn update(&self, event: &WebhookEvent) -> Result<()> {
        let options = ReplaceOptions::builder().upsert(true).build();
        self.collection
            .replace_one(doc! { "id": &event.id }, event, options)
            .await
            .context("Failed to update webhook event")?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<WebhookEvent>> {
        self.collection
            .find_one(doc! { "id": id }, None)
            .await
            .context("Failed to fetch webhook event")
    }

    async fn find_by_type(&self, event_type: WebhookEventType) -> Result<Vec<WebhookEvent>> {
        self.find_sorted(doc! { "event_type": event_type.as_str() }).await
    }

    async fn find_failed(&self) -> Result<Vec<WebhookEvent>> {
        self.find_sorted(doc! { "processing_status": ProcessingStatus::Failed.to_string() })
            .await
    }
}
