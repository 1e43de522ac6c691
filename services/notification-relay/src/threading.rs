//! Channel-threaded mail dispatch.
//!
//! Every email for a chat channel joins one mail thread. The first send stores
//! the subject and the provider's thread id in channel metadata; later sends
//! reuse both so mail clients group the conversation and replies correlate.

use std::sync::Arc;

use anyhow::{Context, Result};

use legalrelay_models::{OutboundEmail, SentEmail};

use crate::providers::{ChatProvider, MailProvider, SUBJECT_METADATA_KEY, THREAD_ID_METADATA_KEY};

pub struct ThreadedMailer {
    mail: Arc<dyn MailProvider>,
    chat: Arc<dyn ChatProvider>,
}

impl ThreadedMailer {
    pub fn new(mail: Arc<dyn MailProvider>, chat: Arc<dyn ChatProvider>) -> Self {
        Self { mail, chat }
    }

    pub async fn send(&self, channel_url: &str, mut email: OutboundEmail) -> Result<SentEmail> {
        let metadata = self
            .chat
            .channel_metadata(channel_url, &[THREAD_ID_METADATA_KEY, SUBJECT_METADATA_KEY])
            .await
            .context("Failed to read channel thread metadata")?;

        let existing_thread = metadata
            .get(THREAD_ID_METADATA_KEY)
            .filter(|id| !id.is_empty())
            .cloned();

        match metadata.get(SUBJECT_METADATA_KEY).filter(|s| !s.is_empty()) {
            Some(subject) => email.subject = subject.clone(),
            None => {
                self.chat
                    .put_channel_metadata(channel_url, SUBJECT_METADATA_KEY, &email.subject)
                    .await
                    .context("Failed to store channel email subject")?;
            }
        }

        email.thread_id = existing_thread.clone();
        let sent = self
            .mail
            .send(&email)
            .await
            .with_context(|| format!("Failed to send notification to {}", email.to))?;

        if existing_thread.is_none() && !sent.thread_id.is_empty() {
            if let Err(err) = self
                .chat
                .put_channel_metadata(channel_url, THREAD_ID_METADATA_KEY, &sent.thread_id)
                .await
            {
                tracing::warn!(
                    channel_url = %channel_url,
                    thread_id = %sent.thread_id,
                    error = %err,
                    "Failed to store channel email thread"
                );
            }
        }

        Ok(sent)
    }
}
