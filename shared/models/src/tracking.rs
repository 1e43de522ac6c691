use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailEventType {
    Sent,
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Spam,
    Unsubscribed,
}

impl EmailEventType {
    pub const ALL: [EmailEventType; 7] = [
        Self::Sent,
        Self::Delivered,
        Self::Opened,
        Self::Clicked,
        Self::Bounced,
        Self::Spam,
        Self::Unsubscribed,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailTrackingEvent {
    pub id: Uuid,
    pub email_id: String,
    pub event_type: EmailEventType,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<Value>,
}
