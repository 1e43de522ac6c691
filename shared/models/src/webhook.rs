use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::chat::{ChannelRef, ChatIdentity};

/// Upper bound on processing attempts for a single webhook event.
pub const MAX_RETRIES: u32 = 3;

pub const CATEGORY_MESSAGE_SEND: &str = "group_channel:message_send";
pub const CATEGORY_FILE: &str = "group_channel:file";
pub const CATEGORY_EMAIL_DELIVERED: &str = "email:delivered";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookEventType {
    #[serde(rename = "message.sent")]
    MessageSent,
    #[serde(rename = "file.uploaded")]
    FileUploaded,
    #[serde(rename = "email.delivered")]
    EmailDelivered,
}

impl WebhookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageSent => "message.sent",
            Self::FileUploaded => "file.uploaded",
            Self::EmailDelivered => "email.delivered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "message.sent" => Some(Self::MessageSent),
            "file.uploaded" => Some(Self::FileUploaded),
            "email.delivered" => Some(Self::EmailDelivered),
            _ => None,
        }
    }
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing states of a webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Signature verified, no attempt made yet
    Pending,
    /// An attempt is running
    Processing,
    /// Last attempt failed, waiting for the backoff delay
    Retrying,
    /// Handler succeeded
    Completed,
    /// Attempts exhausted
    Failed,
}

impl ProcessingStatus {
    pub fn can_transition_to(&self, target: ProcessingStatus) -> bool {
        use ProcessingStatus::*;

        match (self, target) {
            (Pending, Processing) => true,
            (Retrying, Processing) => true,

            (Processing, Completed) => true,
            (Processing, Retrying) => true,
            (Processing, Failed) => true,

            (Completed, _) => false,
            (Failed, _) => false,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Retrying => write!(f, "retrying"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A received webhook and its processing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: WebhookEventType,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub signature: String,
    pub processing_status: ProcessingStatus,
    pub retry_count: u32,
    pub error: Option<String>,
}

impl WebhookEvent {
    pub fn new(event_type: WebhookEventType, payload: Value, signature: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            payload,
            signature: signature.into(),
            processing_status: ProcessingStatus::Pending,
            retry_count: 0,
            error: None,
        }
    }
}

/// Text message posted to a chat channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageEvent {
    pub sender: ChatIdentity,
    pub channel: ChannelRef,
    pub message: String,
    pub message_id: Option<Value>,
}

/// File shared in a chat channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatFileEvent {
    pub sender: ChatIdentity,
    pub channel: ChannelRef,
    pub url: String,
    pub name: Option<String>,
    pub message_id: Option<Value>,
}

impl ChatFileEvent {
    /// Attachment name: the declared file name, else the last path segment of the url.
    pub fn file_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        let path = self.url.split(['?', '#']).next().unwrap_or(&self.url);
        path.rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("attachment")
            .to_string()
    }
}

/// Delivery receipt for a notification email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailDeliveryEvent {
    pub email_id: String,
    #[serde(default)]
    pub recipient: Option<String>,
}

/// Webhook body, closed over the categories the relay understands.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookPayload {
    MessageSent(ChatMessageEvent),
    FileShared(ChatFileEvent),
    EmailDelivered(EmailDeliveryEvent),
    Unhandled { category: String },
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("webhook payload has no category")]
    MissingCategory,

    #[error("malformed {category} payload: {source}")]
    Malformed {
        category: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{category} payload carries neither message text nor file url")]
    EmptyMessage { category: String },
}

#[derive(Debug, Deserialize)]
struct ChatEnvelope {
    sender: ChatIdentity,
    channel: ChannelRef,
    #[serde(default)]
    payload: MessageBody,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    message_id: Option<Value>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

impl WebhookPayload {
    pub fn parse(raw: &Value) -> Result<Self, PayloadError> {
        let category = raw
            .get("category")
            .and_then(Value::as_str)
            .ok_or(PayloadError::MissingCategory)?;

        match category {
            CATEGORY_MESSAGE_SEND | CATEGORY_FILE => {
                let envelope: ChatEnvelope = serde_json::from_value(raw.clone())
                    .map_err(|source| PayloadError::Malformed {
                        category: category.to_string(),
                        source,
                    })?;
                Self::from_chat_envelope(category, envelope)
            }
            CATEGORY_EMAIL_DELIVERED => {
                let body = raw.get("payload").cloned().unwrap_or(Value::Null);
                let delivery = serde_json::from_value(body).map_err(|source| PayloadError::Malformed {
                    category: category.to_string(),
                    source,
                })?;
                Ok(Self::EmailDelivered(delivery))
            }
            other => Ok(Self::Unhandled {
                category: other.to_string(),
            }),
        }
    }

    fn from_chat_envelope(category: &str, envelope: ChatEnvelope) -> Result<Self, PayloadError> {
        let ChatEnvelope {
            sender,
            channel,
            payload,
            kind,
            url,
        } = envelope;

        let is_file_kind = kind
            .as_deref()
            .map(|k| k.eq_ignore_ascii_case("FILE"))
            .unwrap_or(false);
        let text = payload.message.filter(|m| !m.trim().is_empty());
        let url = payload.url.or(url).filter(|u| !u.trim().is_empty());

        if category == CATEGORY_FILE || is_file_kind || text.is_none() {
            if let Some(url) = url {
                return Ok(Self::FileShared(ChatFileEvent {
                    sender,
                    channel,
                    url,
                    name: payload.name.or(payload.filename),
                    message_id: payload.message_id,
                }));
            }
        }

        match text {
            Some(message) => Ok(Self::MessageSent(ChatMessageEvent {
                sender,
                channel,
                message,
                message_id: payload.message_id,
            })),
            None => Err(PayloadError::EmptyMessage {
                category: category.to_string(),
            }),
        }
    }

    /// Event type recorded for this payload; `None` for unhandled categories.
    pub fn event_type(&self) -> Option<WebhookEventType> {
        match self {
            Self::MessageSent(_) => Some(WebhookEventType::MessageSent),
            Self::FileShared(_) => Some(WebhookEventType::FileUploaded),
            Self::EmailDelivered(_) => Some(WebhookEventType::EmailDelivered),
            Self::Unhandled { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_transitions() {
        assert!(ProcessingStatus::Pending.can_transition_to(ProcessingStatus::Processing));
        assert!(ProcessingStatus::Processing.can_transition_to(ProcessingStatus::Retrying));
        assert!(ProcessingStatus::Retrying.can_transition_to(ProcessingStatus::Processing));
        assert!(!ProcessingStatus::Pending.can_transition_to(ProcessingStatus::Completed));
        assert!(!ProcessingStatus::Failed.can_transition_to(ProcessingStatus::Processing));
        assert!(!ProcessingStatus::Completed.can_transition_to(ProcessingStatus::Retrying));
    }

    #[test]
    fn test_parse_text_message() {
        let raw = json!({
            "category": "group_channel:message_send",
            "sender": {"user_id": "attorney1"},
            "channel": {"channel_url": "ch1"},
            "payload": {"message": "Hello"}
        });

        match WebhookPayload::parse(&raw).unwrap() {
            WebhookPayload::MessageSent(event) => {
                assert_eq!(event.sender.user_id, "attorney1");
                assert_eq!(event.channel.channel_url, "ch1");
                assert_eq!(event.message, "Hello");
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_parse_file_message() {
        let raw = json!({
            "category": "group_channel:message_send",
            "type": "FILE",
            "sender": {"user_id": "client1", "nickname": "Dana"},
            "channel": {"channel_url": "ch1"},
            "payload": {"url": "https://files.example.com/a/contract.pdf?x=1"}
        });

        let payload = WebhookPayload::parse(&raw).unwrap();
        assert_eq!(payload.event_type(), Some(WebhookEventType::FileUploaded));
        match payload {
            WebhookPayload::FileShared(event) => assert_eq!(event.file_name(), "contract.pdf"),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_category() {
        let raw = json!({"category": "group_channel:join"});
        assert_eq!(
            WebhookPayload::parse(&raw).unwrap(),
            WebhookPayload::Unhandled { category: "group_channel:join".to_string() }
        );
    }

    #[test]
    fn test_parse_message_without_content() {
        let raw = json!({
            "category": "group_channel:message_send",
            "sender": {"user_id": "a"},
            "channel": {"channel_url": "ch1"},
            "payload": {}
        });
        assert!(matches!(
            WebhookPayload::parse(&raw),
            Err(PayloadError::EmptyMessage { .. })
        ));
    }

    #[test]
    fn test_parse_missing_sender() {
        let raw = json!({
            "category": "group_channel:message_send",
            "channel": {"channel_url": "ch1"},
            "payload": {"message": "hi"}
        });
        assert!(matches!(WebhookPayload::parse(&raw), Err(PayloadError::Malformed { .. })));
    }
}
