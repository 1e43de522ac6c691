//! Webhook event handler: chat events in, notification emails out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;

use legalrelay_database::{CaseDirectory, ThreadCorrelationStore};
use legalrelay_models::{
    ChannelRef, ChatIdentity, CorrelatedRecipient, EmailAttachment, EmailEventType,
    ResolvedRecipient, ThreadCorrelationEntry, WebhookEvent, WebhookPayload,
};

use crate::composer::{NotificationComposer, NotificationContent, NotificationContext};
use crate::metrics::RelayMetrics;
use crate::providers::{ChatError, ChatProvider};
use crate::recipients::RecipientResolver;
use crate::retry::WebhookEventHandler;
use crate::threading::ThreadedMailer;
use crate::tracking::EmailTrackingService;

/// Chat content a notification is built from.
enum ChatContent {
    Text(String),
    File { url: String, name: String },
}

pub struct RelayEventHandler {
    chat: Arc<dyn ChatProvider>,
    resolver: RecipientResolver,
    composer: NotificationComposer,
    cases: Arc<dyn CaseDirectory>,
    mailer: ThreadedMailer,
    correlations: Arc<dyn ThreadCorrelationStore>,
    tracking: EmailTrackingService,
    metrics: RelayMetrics,
    /// Recipients already emailed, per event id, while the event is still
    /// being retried.
    delivered: Mutex<HashMap<String, HashSet<String>>>,
}

impl RelayEventHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chat: Arc<dyn ChatProvider>,
        resolver: RecipientResolver,
        composer: NotificationComposer,
        cases: Arc<dyn CaseDirectory>,
        mailer: ThreadedMailer,
        correlations: Arc<dyn ThreadCorrelationStore>,
        tracking: EmailTrackingService,
        metrics: RelayMetrics,
    ) -> Self {
        Self {
            chat,
            resolver,
            composer,
            cases,
            mailer,
            correlations,
            tracking,
            metrics,
            delivered: Mutex::new(HashMap::new()),
        }
    }

    async fn deliver(
        &self,
        event: &WebhookEvent,
        sender: &ChatIdentity,
        channel: &ChannelRef,
        content: ChatContent,
    ) -> Result<()> {
        let recipients = match self.resolver.resolve(&channel.channel_url, &sender.user_id).await {
            Ok(recipients) => recipients,
            Err(err) if is_stale_session(&err) => {
                self.recover_session(&event.id, &err).await;
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        if recipients.is_empty() {
            tracing::warn!(
                event_id = %event.id,
                channel_url = %channel.channel_url,
                "No notification recipients for channel"
            );
            return Ok(());
        }

        let context = self.context(sender, &channel.channel_url).await;
        let event_url = match &content {
            ChatContent::File { url, .. } => Some(url.clone()),
            ChatContent::Text(_) => None,
        };

        let already = self.delivered.lock().await.get(&event.id).cloned().unwrap_or_default();
        let mut failures = Vec::new();
        for recipient in &recipients {
            let user_id = &recipient.user.user_id;
            if already.contains(user_id) {
                tracing::debug!(event_id = %event.id, recipient = %user_id, "Recipient already notified");
                continue;
            }

            match self
                .notify(event, channel, &content, &context, recipient, event_url.clone())
                .await
            {
                Ok(()) => {
                    self.delivered
                        .lock()
                        .await
                        .entry(event.id.clone())
                        .or_default()
                        .insert(user_id.clone());
                }
                Err(err) if is_stale_session(&err) => self.recover_session(&event.id, &err).await,
                Err(err) => {
                    tracing::error!(
                        event_id = %event.id,
                        recipient = %recipient.user.user_id,
                        error = %err,
                        "Failed to notify recipient"
                    );
                    failures.push(format!("{}: {:#}", recipient.user.user_id, err));
                }
            }
        }

        if !failures.is_empty() {
            anyhow::bail!("Notification failed for {}", failures.join("; "));
        }
        self.delivered.lock().await.remove(&event.id);
        Ok(())
    }

    async fn context(&self, sender: &ChatIdentity, channel_url: &str) -> NotificationContext {
        let case_title = match self.cases.case_title(channel_url).await {
            Ok(title) => title,
            Err(err) => {
                tracing::warn!(channel_url = %channel_url, error = %err, "Case title lookup failed");
                None
            }
        };
        let sender_profile = match case_title {
            Some(_) => None,
            None => self.resolver.sender_profile(&sender.user_id).await,
        };

        NotificationContext { sender: sender.clone(), sender_profile, case_title }
    }

    async fn notify(
        &self,
        event: &WebhookEvent,
        channel: &ChannelRef,
        content: &ChatContent,
        context: &NotificationContext,
        recipient: &ResolvedRecipient,
        event_url: Option<String>,
    ) -> Result<()> {
        let content = match content {
            ChatContent::Text(text) => NotificationContent::Text(text.clone()),
            ChatContent::File { url, name } => {
                let session = self.chat.connect(&recipient.user.user_id).await?;
                let data = self.chat.get_file(url, &session).await?;
                NotificationContent::File(EmailAttachment {
                    filename: name.clone(),
                    data,
                    content_type: None,
                })
            }
        };

        let email = self.composer.compose(content, context, recipient)?;
        let sent = self.mailer.send(&channel.channel_url, email).await?;
        self.metrics.emails_sent.inc();

        let entry = ThreadCorrelationEntry {
            thread_id: sent.thread_id.clone(),
            sender: context.sender.clone(),
            recipient: CorrelatedRecipient::from(recipient),
            channel: channel.clone(),
            original_payload: event.payload.clone(),
            event_type: event.event_type,
            event_url,
            created_at: Utc::now(),
        };
        if let Err(err) = self.correlations.put(entry).await {
            tracing::warn!(
                thread_id = %sent.thread_id,
                error = %err,
                "Failed to store thread correlation"
            );
        }

        self.tracking
            .record(
                &sent.message_id,
                EmailEventType::Sent,
                Some(json!({
                    "recipient": recipient.email,
                    "thread_id": sent.thread_id,
                    "webhook_event_id": event.id,
                })),
            )
            .await;

        tracing::info!(
            event_id = %event.id,
            recipient = %recipient.user.user_id,
            thread_id = %sent.thread_id,
            "Notification email sent"
        );
        Ok(())
    }

    async fn recover_session(&self, event_id: &str, err: &anyhow::Error) {
        tracing::warn!(event_id = %event_id, error = %err, "Stale chat session, reconnecting");
        self.chat.reconnect().await;
    }
}

fn is_stale_session(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<ChatError>())
        .any(ChatError::is_stale_session)
}

#[async_trait]
impl WebhookEventHandler for RelayEventHandler {
    async fn handle(&self, event: &WebhookEvent) -> Result<()> {
        let payload = WebhookPayload::parse(&event.payload)
            .with_context(|| format!("Invalid {} payload", event.event_type))?;

        match payload {
            WebhookPayload::MessageSent(message) => {
                self.deliver(event, &message.sender, &message.channel, ChatContent::Text(message.message))
                    .await
            }
            WebhookPayload::FileShared(file) => {
                let name = file.file_name();
                self.deliver(
                    event,
                    &file.sender,
                    &file.channel,
                    ChatContent::File { url: file.url, name },
                )
                .await
            }
            WebhookPayload::EmailDelivered(delivery) => {
                self.tracking
                    .record(
                        &delivery.email_id,
                        EmailEventType::Delivered,
                        delivery.recipient.map(|r| json!({ "recipient": r })),
                    )
                    .await;
                Ok(())
            }
            WebhookPayload::Unhandled { category } => {
                tracing::info!(
                    event_id = %event.id,
                    category = %category,
                    "Ignoring unhandled webhook category"
                );
                Ok(())
            }
        }
    }
}
