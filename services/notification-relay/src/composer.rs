//! Notification Composer
//!
//! Builds the outbound email for one recipient of a chat event.

use anyhow::{Context, Result};
use handlebars::Handlebars;
use serde_json::json;

use legalrelay_models::{ChatIdentity, EmailAttachment, IdentityRecord, OutboundEmail, RecipientRole, ResolvedRecipient};

const CASE_SUBJECT: &str = "case_subject";
const FROM_ATTORNEY_SUBJECT: &str = "from_attorney_subject";
const FROM_CLIENT_SUBJECT: &str = "from_client_subject";
const GENERIC_SUBJECT: &str = "generic_subject";
const FILE_BODY: &str = "file_body";

/// What the chat event carried.
#[derive(Debug, Clone)]
pub enum NotificationContent {
    Text(String),
    /// A shared file, already fetched with the recipient's session.
    File(EmailAttachment),
}

/// Per-event facts shared by every recipient's email.
#[derive(Debug, Clone, Default)]
pub struct NotificationContext {
    pub sender: ChatIdentity,
    pub sender_profile: Option<IdentityRecord>,
    pub case_title: Option<String>,
}

impl NotificationContext {
    fn sender_name(&self) -> &str {
        self.sender_profile
            .as_ref()
            .and_then(|p| p.name.as_deref())
            .filter(|n| !n.trim().is_empty())
            .or_else(|| Some(self.sender.nickname.as_str()).filter(|n| !n.trim().is_empty()))
            .unwrap_or(&self.sender.user_id)
    }

    fn sender_firm(&self) -> Option<&str> {
        self.sender_profile
            .as_ref()
            .and_then(|p| p.firm_name.as_deref())
            .filter(|f| !f.trim().is_empty())
    }
}

pub struct NotificationComposer {
    templates: Handlebars<'static>,
}

impl NotificationComposer {
    pub fn new() -> Result<Self> {
        let mut templates = Handlebars::new();
        // Subjects and bodies are plain text; HTML escaping happens at MIME build time.
        templates.register_escape_fn(handlebars::no_escape);

        for (name, template) in [
            (CASE_SUBJECT, "New messages for case: {{title}}"),
            (
                FROM_ATTORNEY_SUBJECT,
                "New message from an attorney: {{name}}{{#if firm}} — {{firm}}{{/if}}",
            ),
            (FROM_CLIENT_SUBJECT, "New message from a client: {{name}}"),
            (GENERIC_SUBJECT, "New message from {{name}}"),
            (FILE_BODY, "{{name}} shared a file with you:"),
        ] {
            templates
                .register_template_string(name, template)
                .with_context(|| format!("Invalid notification template {}", name))?;
        }

        Ok(Self { templates })
    }

    pub fn subject(&self, context: &NotificationContext, recipient_role: RecipientRole) -> Result<String> {
        if let Some(title) = context.case_title.as_deref().filter(|t| !t.trim().is_empty()) {
            return self.render(CASE_SUBJECT, &json!({ "title": title }));
        }

        let template = match recipient_role {
            RecipientRole::Client => FROM_ATTORNEY_SUBJECT,
            RecipientRole::Attorney => FROM_CLIENT_SUBJECT,
            RecipientRole::Other => GENERIC_SUBJECT,
        };
        self.render(
            template,
            &json!({ "name": context.sender_name(), "firm": context.sender_firm() }),
        )
    }

    pub fn compose(
        &self,
        content: NotificationContent,
        context: &NotificationContext,
        recipient: &ResolvedRecipient,
    ) -> Result<OutboundEmail> {
        let subject = self.subject(context, recipient.role)?;

        let (body, attachments) = match content {
            NotificationContent::Text(message) => (message, Vec::new()),
            NotificationContent::File(attachment) => {
                let name = Some(context.sender.nickname.as_str())
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or(&context.sender.user_id);
                (self.render(FILE_BODY, &json!({ "name": name }))?, vec![attachment])
            }
        };

        Ok(OutboundEmail {
            to: recipient.email.clone(),
            subject,
            body,
            attachments,
            recipient_role: recipient.role,
            thread_id: None,
        })
    }

    fn render(&self, template: &str, data: &serde_json::Value) -> Result<String> {
        self.templates
            .render(template, data)
            .with_context(|| format!("Failed to render {}", template))
    }
}
