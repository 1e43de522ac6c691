//! Email Tracking
//!
//! Per-email event log (sent, delivered, opened, ...) with summary statistics.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use legalrelay_models::{EmailEventType, EmailTrackingEvent};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailStats {
    pub email_id: String,
    pub total_events: usize,
    pub counts: HashMap<EmailEventType, usize>,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Default)]
pub struct EmailTrackingService {
    events: Arc<RwLock<HashMap<String, Vec<EmailTrackingEvent>>>>,
}

impl EmailTrackingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(
        &self,
        email_id: &str,
        event_type: EmailEventType,
        metadata: Option<Value>,
    ) -> EmailTrackingEvent {
        let event = EmailTrackingEvent {
            id: Uuid::new_v4(),
            email_id: email_id.to_string(),
            event_type,
            timestamp: Utc::now(),
            metadata,
        };

        let mut events = self.events.write().await;
        events
            .entry(email_id.to_string())
            .or_default()
            .push(event.clone());

        tracing::debug!(email_id = %email_id, event_type = ?event_type, "Tracked email event");
        event
    }

    /// Events for `email_id` in the order they were recorded.
    pub async fn events(&self, email_id: &str) -> Vec<EmailTrackingEvent> {
        let events = self.events.read().await;
        events.get(email_id).cloned().unwrap_or_default()
    }

    pub async fn stats(&self, email_id: &str) -> EmailStats {
        let events = self.events(email_id).await;

        let mut counts: HashMap<EmailEventType, usize> =
            EmailEventType::ALL.iter().map(|t| (*t, 0)).collect();
        for event in &events {
            *counts.entry(event.event_type).or_insert(0) += 1;
        }

        EmailStats {
            email_id: email_id.to_string(),
            total_events: events.len(),
            counts,
            first_event_at: events.iter().map(|e| e.timestamp).min(),
            last_event_at: events.iter().map(|e| e.timestamp).max(),
        }
    }
}
