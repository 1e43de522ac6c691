//! Capability interfaces for the chat and mail providers, plus their HTTP adapters.

pub mod chat;
pub mod gmail;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use legalrelay_models::{
    ChannelRef, ChatChannel, ChatMessage, ChatUser, EmailMessage, EmailSummary, OutboundEmail,
    SentEmail,
};

pub use chat::SendbirdClient;
pub use gmail::GmailClient;

/// Provider codes meaning the cached session is no longer valid.
pub const STALE_SESSION_CODES: [i64; 4] = [400300, 400301, 400302, 400310];

/// Channel metadata key holding the channel's email thread id.
pub const THREAD_ID_METADATA_KEY: &str = "email_thread_id";
/// Channel metadata key holding the subject the thread was opened with.
pub const SUBJECT_METADATA_KEY: &str = "email_subject";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat provider error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("chat provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected chat provider response: {0}")]
    Decode(String),
}

impl ChatError {
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_stale_session(&self) -> bool {
        self.code()
            .map(|code| STALE_SESSION_CODES.contains(&code))
            .unwrap_or(false)
    }
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail provider authorization failed: {0}")]
    Auth(String),

    #[error("mail provider error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("mail provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected mail provider response: {0}")]
    Decode(String),

    #[error("unable to build outbound message: {0}")]
    Compose(String),
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Session token for acting on behalf of `user_id`.
    async fn connect(&self, user_id: &str) -> Result<String, ChatError>;

    async fn channel_members(&self, channel_url: &str) -> Result<Vec<ChatUser>, ChatError>;

    async fn get_user(&self, user_id: &str) -> Result<ChatUser, ChatError>;

    async fn send_message(
        &self,
        channel_url: &str,
        user_id: &str,
        text: &str,
    ) -> Result<ChatMessage, ChatError>;

    async fn get_file(&self, url: &str, session_token: &str) -> Result<Vec<u8>, ChatError>;

    async fn create_channel(&self, user_ids: &[String]) -> Result<ChatChannel, ChatError>;

    /// Values for the requested keys; absent keys are omitted from the map.
    async fn channel_metadata(
        &self,
        channel_url: &str,
        keys: &[&str],
    ) -> Result<HashMap<String, String>, ChatError>;

    async fn put_channel_metadata(
        &self,
        channel_url: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ChatError>;

    /// Channel whose `email_thread_id` metadata equals `thread_id`.
    async fn find_channel_by_thread_id(
        &self,
        thread_id: &str,
    ) -> Result<Option<ChannelRef>, ChatError>;

    /// Drops cached sessions so the next call starts fresh.
    async fn reconnect(&self);
}

#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Unread messages in the inbox.
    async fn list_unread(&self) -> Result<Vec<EmailSummary>, MailError>;

    /// Full message with its raw (uncleaned) body.
    async fn get_message(&self, id: &str) -> Result<EmailMessage, MailError>;

    async fn send(&self, email: &OutboundEmail) -> Result<SentEmail, MailError>;

    async fn mark_read(&self, id: &str) -> Result<(), MailError>;
}
