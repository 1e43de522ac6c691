use serde::{Deserialize, Serialize};

use crate::identity::RecipientRole;

/// Minimal reference to a chat user, as carried in webhook bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatIdentity {
    pub user_id: String,
    #[serde(default)]
    pub nickname: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub channel_url: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUserMetadata {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// User record held by the chat provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub user_id: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub metadata: ChatUserMetadata,
}

impl ChatUser {
    pub fn role(&self) -> RecipientRole {
        RecipientRole::from_metadata(self.metadata.role.as_deref())
    }

    pub fn identity(&self) -> ChatIdentity {
        ChatIdentity {
            user_id: self.user_id.clone(),
            nickname: self.nickname.clone(),
        }
    }
}

/// Message accepted by the chat provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: i64,
    pub channel_url: String,
    pub user_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChannel {
    pub channel_url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<String>,
}
