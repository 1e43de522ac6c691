//! Recipient Resolution
//!
//! Turns a channel's membership into deliverable email recipients.

use std::sync::Arc;

use anyhow::{Context, Result};

use legalrelay_database::IdentityStore;
use legalrelay_models::{ChatUser, IdentityRecord, IdentityTable, ResolvedRecipient};
use legalrelay_utils::validate_model;

use crate::providers::{ChatError, ChatProvider};

pub struct RecipientResolver {
    chat: Arc<dyn ChatProvider>,
    identities: Arc<dyn IdentityStore>,
}

impl RecipientResolver {
    pub fn new(chat: Arc<dyn ChatProvider>, identities: Arc<dyn IdentityStore>) -> Self {
        Self { chat, identities }
    }

    /// Channel members other than `sender_id` that have a resolvable email address.
    ///
    /// Members without an address, or whose lookup fails, are skipped with a
    /// warning. A stale chat session on one member triggers a reconnect and a
    /// single retry of that member; the rest of the channel is still resolved.
    pub async fn resolve(&self, channel_url: &str, sender_id: &str) -> Result<Vec<ResolvedRecipient>> {
        let members = self
            .chat
            .channel_members(channel_url)
            .await
            .context("Failed to fetch channel members")?;

        let mut recipients = Vec::new();
        for member in members.into_iter().filter(|m| m.user_id != sender_id) {
            let resolved = match self.resolve_member(&member.user_id).await {
                Err(err) if err.is_stale_session() => {
                    tracing::warn!(
                        channel_url = %channel_url,
                        recipient = %member.user_id,
                        error = %err,
                        "Stale chat session during recipient lookup, reconnecting"
                    );
                    self.chat.reconnect().await;
                    self.resolve_member(&member.user_id).await
                }
                other => other,
            };

            match resolved {
                Ok(Some(recipient)) => recipients.push(recipient),
                Ok(None) => {
                    tracing::warn!(
                        channel_url = %channel_url,
                        recipient = %member.user_id,
                        "No email found for recipient"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        channel_url = %channel_url,
                        recipient = %member.user_id,
                        error = %err,
                        "Skipping recipient after lookup failure"
                    );
                }
            }
        }

        Ok(recipients)
    }

    async fn resolve_member(&self, user_id: &str) -> Result<Option<ResolvedRecipient>, ChatError> {
        let user = self.chat.get_user(user_id).await?;
        let role = user.role();

        let Some(email) = self.lookup_email(&user, role.lookup_order()).await else {
            return Ok(None);
        };

        let recipient = ResolvedRecipient { user, email, role };
        if let Err(err) = validate_model(&recipient) {
            tracing::warn!(recipient = %user_id, error = %err, "Recipient email rejected");
            return Ok(None);
        }
        Ok(Some(recipient))
    }

    /// First non-empty address across `tables`, in order.
    async fn lookup_email(&self, user: &ChatUser, tables: &[IdentityTable]) -> Option<String> {
        for table in tables {
            match self.identities.find(*table, &user.user_id).await {
                Ok(Some(record)) => {
                    if let Some(email) = record.email.filter(|e| !e.trim().is_empty()) {
                        return Some(email.trim().to_string());
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        recipient = %user.user_id,
                        table = table.table_name(),
                        error = %err,
                        "Identity lookup failed"
                    );
                }
            }
        }
        None
    }

    /// Identity record of the message author, used for role-aware subjects.
    pub async fn sender_profile(&self, sender_id: &str) -> Option<IdentityRecord> {
        for table in [IdentityTable::Attorneys, IdentityTable::Users] {
            match self.identities.find(table, sender_id).await {
                Ok(Some(record)) => return Some(record),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(sender = %sender_id, error = %err, "Sender profile lookup failed");
                }
            }
        }
        None
    }
}
