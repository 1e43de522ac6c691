use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{ChannelRef, ChatIdentity};
use crate::identity::{RecipientRole, ResolvedRecipient};
use crate::webhook::WebhookEventType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelatedRecipient {
    pub user_id: String,
    pub nickname: String,
    pub email: String,
    pub role: RecipientRole,
}

impl From<&ResolvedRecipient> for CorrelatedRecipient {
    fn from(recipient: &ResolvedRecipient) -> Self {
        Self {
            user_id: recipient.user.user_id.clone(),
            nickname: recipient.user.nickname.clone(),
            email: recipient.email.clone(),
            role: recipient.role,
        }
    }
}

/// Chat context behind an outbound notification thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadCorrelationEntry {
    pub thread_id: String,
    pub sender: ChatIdentity,
    pub recipient: CorrelatedRecipient,
    pub channel: ChannelRef,
    pub original_payload: Value,
    pub event_type: WebhookEventType,
    pub event_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ThreadCorrelationEntry {
    /// Chat user a reply from `sender_address` is posted as.
    ///
    /// Notifications for a channel share one mail thread, so the stored
    /// recipient is only the author when the reply comes from their address.
    pub fn reply_identity<'a>(&'a self, sender_address: &str, system_user_id: &'a str) -> &'a str {
        let recipient = &self.recipient;
        if recipient.user_id.trim().is_empty()
            || !recipient.email.trim().eq_ignore_ascii_case(sender_address.trim())
        {
            system_user_id
        } else {
            &recipient.user_id
        }
    }
}
