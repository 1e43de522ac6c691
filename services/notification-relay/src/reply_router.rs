//! Email Reply Router
//!
//! Relays inbound email replies back into the chat channel that produced the
//! notification. Threads are matched through the correlation store first and
//! channel metadata second; unmatched emails stay unread for a later poll.
//! A reply is posted as the notified recipient only when it comes from that
//! recipient's address, otherwise as the system user.

use std::sync::Arc;

use anyhow::{Context, Result};
use lettre::message::Mailbox;
use serde::Serialize;
use tokio::sync::Mutex;

use legalrelay_database::ThreadCorrelationStore;
use legalrelay_models::EmailSummary;

use crate::metrics::RelayMetrics;
use crate::providers::{ChatProvider, MailProvider};
use crate::sanitizer;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub fetched: usize,
    pub relayed: usize,
    pub unmatched: usize,
    pub empty: usize,
    pub failed: usize,
    /// Set when another poll was already running.
    pub skipped_overlap: bool,
}

/// Outcome for a single inbound email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyOutcome {
    Relayed,
    Unmatched,
    Empty,
}

/// Where a reply goes, and as whom.
struct ReplyTarget {
    channel_url: String,
    user_id: String,
    /// Correlation entry to clear once relayed.
    correlation: Option<String>,
}

pub struct EmailReplyRouter {
    mail: Arc<dyn MailProvider>,
    chat: Arc<dyn ChatProvider>,
    correlations: Arc<dyn ThreadCorrelationStore>,
    system_user_id: String,
    metrics: RelayMetrics,
    running: Mutex<()>,
}

impl EmailReplyRouter {
    pub fn new(
        mail: Arc<dyn MailProvider>,
        chat: Arc<dyn ChatProvider>,
        correlations: Arc<dyn ThreadCorrelationStore>,
        system_user_id: impl Into<String>,
        metrics: RelayMetrics,
    ) -> Self {
        Self {
            mail,
            chat,
            correlations,
            system_user_id: system_user_id.into(),
            metrics,
            running: Mutex::new(()),
        }
    }

    /// One poll cycle over the unread inbox.
    pub async fn poll_and_relay(&self) -> Result<PollSummary> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::debug!("Email poll already running, skipping");
            return Ok(PollSummary { skipped_overlap: true, ..Default::default() });
        };

        let unread = self
            .mail
            .list_unread()
            .await
            .context("Failed to list unread emails")?;

        let mut summary = PollSummary { fetched: unread.len(), ..Default::default() };
        for email in &unread {
            match self.relay(email).await {
                Ok(ReplyOutcome::Relayed) => summary.relayed += 1,
                Ok(ReplyOutcome::Unmatched) => summary.unmatched += 1,
                Ok(ReplyOutcome::Empty) => summary.empty += 1,
                Err(err) => {
                    summary.failed += 1;
                    self.metrics.reply_failures.inc();
                    tracing::error!(
                        email_id = %email.id,
                        thread_id = %email.thread_id,
                        error = %format!("{:#}", err),
                        "Failed to relay email reply"
                    );
                }
            }
        }

        if summary.fetched > 0 {
            tracing::info!(
                fetched = summary.fetched,
                relayed = summary.relayed,
                unmatched = summary.unmatched,
                failed = summary.failed,
                "Email poll complete"
            );
        }
        Ok(summary)
    }

    async fn relay(&self, summary: &EmailSummary) -> Result<ReplyOutcome> {
        let email = self
            .mail
            .get_message(&summary.id)
            .await
            .context("Failed to fetch email")?;

        let sender = sender_address(&email.sender);
        let Some(target) = self.target(&summary.thread_id, &sender).await? else {
            tracing::debug!(thread_id = %summary.thread_id, "No chat thread for email");
            return Ok(ReplyOutcome::Unmatched);
        };

        let body = sanitizer::clean(&email.body);

        if body.is_empty() {
            tracing::warn!(email_id = %summary.id, "Email reply has no content, marking read");
            self.mail.mark_read(&summary.id).await.context("Failed to mark email read")?;
            return Ok(ReplyOutcome::Empty);
        }

        self.chat
            .send_message(&target.channel_url, &target.user_id, &body)
            .await
            .context("Failed to post reply to chat")?;
        self.metrics.replies_relayed.inc();

        if let Some(thread_id) = &target.correlation {
            if let Err(err) = self.correlations.delete(thread_id).await {
                tracing::warn!(thread_id = %thread_id, error = %err, "Failed to clear thread correlation");
            }
        }

        self.mail
            .mark_read(&summary.id)
            .await
            .context("Failed to mark email read")?;

        tracing::info!(
            email_id = %summary.id,
            channel_url = %target.channel_url,
            user_id = %target.user_id,
            "Email reply relayed to chat"
        );
        Ok(ReplyOutcome::Relayed)
    }

    async fn target(&self, thread_id: &str, sender: &str) -> Result<Option<ReplyTarget>> {
        if let Some(entry) = self
            .correlations
            .get(thread_id)
            .await
            .context("Failed to read thread correlation")?
        {
            return Ok(Some(ReplyTarget {
                channel_url: entry.channel.channel_url.clone(),
                user_id: entry.reply_identity(sender, &self.system_user_id).to_string(),
                correlation: Some(entry.thread_id.clone()),
            }));
        }

        let channel = self
            .chat
            .find_channel_by_thread_id(thread_id)
            .await
            .context("Failed to look up channel by thread")?;

        Ok(channel.map(|channel| ReplyTarget {
            channel_url: channel.channel_url,
            user_id: self.system_user_id.clone(),
            correlation: None,
        }))
    }
}

/// Bare address of a `From` header value, e.g. `Ann Lee <ann@firm.com>`.
fn sender_address(from: &str) -> String {
    match from.parse::<Mailbox>() {
        Ok(mailbox) => mailbox.email.to_string(),
        Err(_) => from.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeChat, FakeMail};
    use crate::providers::THREAD_ID_METADATA_KEY;
    use chrono::Utc;
    use legalrelay_database::InMemoryCorrelationStore;
    use legalrelay_models::{
        ChannelRef, ChatIdentity, CorrelatedRecipient, RecipientRole, ThreadCorrelationEntry,
        WebhookEventType,
    };
    use serde_json::json;

    struct Harness {
        chat: Arc<FakeChat>,
        mail: Arc<FakeMail>,
        correlations: Arc<InMemoryCorrelationStore>,
        router: EmailReplyRouter,
    }

    fn harness() -> Harness {
        let chat = Arc::new(FakeChat::new());
        let mail = Arc::new(FakeMail::new());
        let correlations = Arc::new(InMemoryCorrelationStore::new());
        let router = EmailReplyRouter::new(
            mail.clone(),
            chat.clone(),
            correlations.clone(),
            "system",
            RelayMetrics::new().unwrap(),
        );
        Harness { chat, mail, correlations, router }
    }

    fn entry(thread_id: &str, channel_url: &str, recipient: &str) -> ThreadCorrelationEntry {
        ThreadCorrelationEntry {
            thread_id: thread_id.into(),
            sender: ChatIdentity { user_id: "client1".into(), nickname: String::new() },
            recipient: CorrelatedRecipient {
                user_id: recipient.into(),
                nickname: String::new(),
                email: "attorney@firm.com".into(),
                role: RecipientRole::Attorney,
            },
            channel: ChannelRef { channel_url: channel_url.into(), name: None },
            original_payload: json!({}),
            event_type: WebhookEventType::MessageSent,
            event_url: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_correlated_reply_is_relayed_and_cleared() {
        let h = harness();
        h.correlations.put(entry("t1", "ch1", "attorney1")).await.unwrap();
        h.mail.deliver_from(
            "m1",
            "t1",
            "Ann Lee <Attorney@firm.com>",
            "On Mon, Jan 1 wrote:\n> old stuff\nNew reply text",
        );

        let summary = h.router.poll_and_relay().await.unwrap();

        assert_eq!(summary.relayed, 1);
        let messages = h.chat.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].channel_url, "ch1");
        assert_eq!(messages[0].user_id, "attorney1");
        assert_eq!(messages[0].message, "New reply text");
        assert!(h.correlations.get("t1").await.unwrap().is_none());
        assert_eq!(h.mail.read_ids(), vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn test_second_poll_does_not_relay_again() {
        let h = harness();
        h.correlations.put(entry("t1", "ch1", "attorney1")).await.unwrap();
        h.mail.deliver("m1", "t1", "Thanks");

        h.router.poll_and_relay().await.unwrap();
        let second = h.router.poll_and_relay().await.unwrap();

        assert_eq!(second.fetched, 0);
        assert_eq!(h.chat.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_channel_metadata() {
        let h = harness();
        h.chat.set_metadata("ch7", THREAD_ID_METADATA_KEY, "t7");
        h.mail.deliver("m1", "t7", "Sounds good");

        h.router.poll_and_relay().await.unwrap();

        let messages = h.chat.messages();
        assert_eq!(messages[0].channel_url, "ch7");
        assert_eq!(messages[0].user_id, "system");
    }

    #[tokio::test]
    async fn test_missing_recipient_identity_posts_as_system() {
        let h = harness();
        h.correlations.put(entry("t1", "ch1", "")).await.unwrap();
        h.mail.deliver_from("m1", "t1", "attorney@firm.com", "Hi");

        h.router.poll_and_relay().await.unwrap();
        assert_eq!(h.chat.messages()[0].user_id, "system");
    }

    #[tokio::test]
    async fn test_reply_from_other_party_posts_as_system() {
        let h = harness();
        // Last notification on the shared thread went to the attorney.
        h.correlations.put(entry("t1", "ch1", "attorney1")).await.unwrap();
        h.mail.deliver_from("m1", "t1", "Client One <client@x.com>", "Any update?");

        let summary = h.router.poll_and_relay().await.unwrap();

        assert_eq!(summary.relayed, 1);
        let messages = h.chat.messages();
        assert_eq!(messages[0].channel_url, "ch1");
        assert_eq!(messages[0].user_id, "system");
    }

    #[test]
    fn test_sender_address() {
        assert_eq!(sender_address("Ann Lee <ann@firm.com>"), "ann@firm.com");
        assert_eq!(sender_address(" ann@firm.com "), "ann@firm.com");
    }

    #[tokio::test]
    async fn test_unmatched_email_stays_unread() {
        let h = harness();
        h.mail.deliver("m1", "unknown", "Hello?");

        let summary = h.router.poll_and_relay().await.unwrap();

        assert_eq!(summary.unmatched, 1);
        assert!(h.chat.messages().is_empty());
        assert!(h.mail.read_ids().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_email() {
        let h = harness();
        h.correlations.put(entry("t1", "ch1", "attorney1")).await.unwrap();
        h.correlations.put(entry("t2", "ch2", "attorney1")).await.unwrap();
        h.correlations.put(entry("t3", "ch3", "attorney1")).await.unwrap();
        h.mail.deliver("m1", "t1", "first");
        h.mail.deliver("m2", "t2", "second");
        h.mail.deliver("m3", "t3", "third");
        h.mail.fail_fetch_of("m1");
        h.chat.fail_messages_to("ch2");

        let summary = h.router.poll_and_relay().await.unwrap();

        assert_eq!(summary.failed, 2);
        assert_eq!(summary.relayed, 1);
        assert_eq!(h.mail.read_ids(), vec!["m3".to_string()]);
        // Failed relays keep their correlation for the next poll.
        assert!(h.correlations.get("t2").await.unwrap().is_some());
    }
}
