//! Gmail REST API adapter.
//!
//! Authorizes with an OAuth refresh token, builds outbound MIME with lettre and
//! submits it base64url-encoded, threading follow-ups onto the channel's thread.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use handlebars::Handlebars;
use lettre::message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Message;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;

use legalrelay_models::{
    EmailAttachment, EmailMessage, EmailSummary, OutboundEmail, RecipientRole, SentEmail,
};
use legalrelay_utils::MailConfig;

use super::{MailError, MailProvider};

const UNREAD_QUERY: &str = "is:inbox is:unread";
const NOTIFICATION_TEMPLATE: &str = "notification_html";

const NOTIFICATION_HTML: &str = r#"<div>{{{body}}}</div>
<p style="font-size: 12px;">{{lead}} <a href="{{endpoint}}">the LegalRelay portal</a>{{trail}}</p>"#;

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct GmailClient {
    http: Client,
    config: MailConfig,
    token: RwLock<Option<AccessToken>>,
    templates: Handlebars<'static>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: i64,
}

fn default_expiry() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    id: String,
    #[serde(default)]
    thread_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    attachment_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: PartBody,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullMessage {
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    payload: MessagePart,
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    data: String,
}

impl MessagePart {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    fn find_text(&self, mime_type: &str) -> Option<&str> {
        if self.mime_type.eq_ignore_ascii_case(mime_type) {
            if let Some(data) = self.body.data.as_deref() {
                return Some(data);
            }
        }
        self.parts.iter().find_map(|part| part.find_text(mime_type))
    }

    fn collect_attachments<'a>(&'a self, found: &mut Vec<&'a MessagePart>) {
        if !self.filename.is_empty() && self.body.attachment_id.is_some() {
            found.push(self);
        }
        for part in &self.parts {
            part.collect_attachments(found);
        }
    }
}

fn decode_base64url(data: &str) -> Result<Vec<u8>, MailError> {
    URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map_err(|e| MailError::Decode(format!("invalid base64url content: {}", e)))
}

fn footer_text(role: RecipientRole) -> (&'static str, &'static str) {
    match role {
        RecipientRole::Client => (
            "You can respond to this attorney directly by replying to this email, or log on to",
            " to message the attorney in the \"Message Center\".",
        ),
        RecipientRole::Attorney => (
            "You can respond to this client directly by replying to this email, or log on to",
            " to message the client in the \"Message Center\".",
        ),
        RecipientRole::Other => ("You can reply to this email directly or log on to", "."),
    }
}

impl GmailClient {
    pub fn new(config: MailConfig) -> Result<Self, MailError> {
        let mut templates = Handlebars::new();
        templates
            .register_template_string(NOTIFICATION_TEMPLATE, NOTIFICATION_HTML)
            .map_err(|e| MailError::Compose(e.to_string()))?;

        Ok(Self {
            http: Client::new(),
            config,
            token: RwLock::new(None),
            templates,
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<String, MailError> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.expires_at > Utc::now() + Duration::seconds(60) {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", self.config.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MailError::Auth(text));
        }

        let granted: TokenResponse = response
            .json()
            .await
            .map_err(|e| MailError::Auth(e.to_string()))?;

        let token = AccessToken {
            value: granted.access_token,
            expires_at: Utc::now() + Duration::seconds(granted.expires_in),
        };
        tracing::debug!(expires_at = %token.expires_at, "Refreshed mail provider access token");

        let value = token.value.clone();
        *self.token.write().await = Some(token);
        Ok(value)
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, MailError> {
        let token = self.access_token().await?;
        let response = request.bearer_auth(token).send().await?;

        let status = response.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                *self.token.write().await = None;
            }
            return Err(MailError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| MailError::Decode(e.to_string()))
    }

    fn render_html(&self, body: &str, role: RecipientRole) -> Result<String, MailError> {
        let (lead, trail) = footer_text(role);
        let escaped = handlebars::html_escape(body).replace('\n', "<br>");

        self.templates
            .render(
                NOTIFICATION_TEMPLATE,
                &json!({
                    "body": escaped,
                    "lead": lead,
                    "endpoint": self.config.client_endpoint,
                    "trail": trail,
                }),
            )
            .map_err(|e| MailError::Compose(e.to_string()))
    }

    /// RFC 5322 message for `email`, threaded onto `email.thread_id` when set.
    pub fn build_message(&self, email: &OutboundEmail) -> Result<Vec<u8>, MailError> {
        let from: Mailbox = self
            .config
            .from_address
            .parse()
            .map_err(|e| MailError::Compose(format!("invalid from address: {}", e)))?;
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| MailError::Compose(format!("invalid recipient address: {}", e)))?;

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.clone())
            .message_id(Some(format!("<{}@{}>", Uuid::new_v4(), self.config.thread_domain)))
            .date_now();

        if let Some(thread_id) = &email.thread_id {
            let thread_ref = format!("<thread-{}@{}>", thread_id, self.config.thread_domain);
            builder = builder.in_reply_to(thread_ref.clone()).references(thread_ref);
        }

        let html = self.render_html(&email.body, email.recipient_role)?;
        let mut body = MultiPart::mixed().singlepart(SinglePart::html(html));
        for attachment in &email.attachments {
            body = body.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(attachment.data.clone(), attachment_content_type(attachment)?),
            );
        }

        let message = builder
            .multipart(body)
            .map_err(|e| MailError::Compose(e.to_string()))?;
        Ok(message.formatted())
    }

    async fn fetch_attachment(
        &self,
        message_id: &str,
        part: &MessagePart,
    ) -> Result<Option<EmailAttachment>, MailError> {
        let Some(attachment_id) = part.body.attachment_id.as_deref() else {
            return Ok(None);
        };

        let path = format!("/messages/{}/attachments/{}", message_id, attachment_id);
        let body: AttachmentBody = self.call(self.http.get(self.api(&path))).await?;

        Ok(Some(EmailAttachment {
            filename: part.filename.clone(),
            data: decode_base64url(&body.data)?,
            content_type: Some(part.mime_type.clone()).filter(|m| !m.is_empty()),
        }))
    }
}

fn attachment_content_type(attachment: &EmailAttachment) -> Result<ContentType, MailError> {
    attachment
        .content_type
        .as_deref()
        .and_then(|declared| ContentType::parse(declared).ok())
        .map(Ok)
        .unwrap_or_else(|| ContentType::parse("application/octet-stream"))
        .map_err(|e| MailError::Compose(e.to_string()))
}

#[async_trait]
impl MailProvider for GmailClient {
    async fn list_unread(&self) -> Result<Vec<EmailSummary>, MailError> {
        let mut summaries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(self.api("/messages"))
                .query(&[("q", UNREAD_QUERY)]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let list: MessageList = self.call(request).await?;
            summaries.extend(list.messages.into_iter().map(|m| EmailSummary {
                id: m.id,
                thread_id: m.thread_id,
            }));

            match list.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(summaries)
    }

    async fn get_message(&self, id: &str) -> Result<EmailMessage, MailError> {
        let request = self
            .http
            .get(self.api(&format!("/messages/{}", id)))
            .query(&[("format", "full")]);
        let message: FullMessage = self.call(request).await?;
        let payload = &message.payload;

        let encoded_body = payload
            .body
            .data
            .as_deref()
            .or_else(|| payload.find_text("text/plain"))
            .or_else(|| payload.find_text("text/html"));
        let body = match encoded_body {
            Some(data) => String::from_utf8_lossy(&decode_base64url(data)?).into_owned(),
            None => {
                tracing::warn!(message_id = %id, "Email has no text body");
                String::new()
            }
        };

        let mut parts = Vec::new();
        payload.collect_attachments(&mut parts);
        let mut attachments = Vec::new();
        for part in parts {
            if let Some(attachment) = self.fetch_attachment(&message.id, part).await? {
                attachments.push(attachment);
            }
        }

        Ok(EmailMessage {
            message_id: message.id.clone(),
            sender: payload.header("From").unwrap_or_default().to_string(),
            subject: payload.header("Subject").unwrap_or_default().to_string(),
            body,
            attachments,
            thread_id: message.thread_id.clone(),
        })
    }

    async fn send(&self, email: &OutboundEmail) -> Result<SentEmail, MailError> {
        let raw = URL_SAFE_NO_PAD.encode(self.build_message(email)?);

        let mut request_body = json!({ "raw": raw });
        if let Some(thread_id) = &email.thread_id {
            request_body["threadId"] = json!(thread_id);
        }

        let sent: MessageRef = self
            .call(self.http.post(self.api("/messages/send")).json(&request_body))
            .await?;

        tracing::info!(message_id = %sent.id, thread_id = %sent.thread_id, "Email sent");
        Ok(SentEmail {
            message_id: sent.id,
            thread_id: sent.thread_id,
        })
    }

    async fn mark_read(&self, id: &str) -> Result<(), MailError> {
        let path = format!("/messages/{}/modify", id);
        let _: serde_json::Value = self
            .call(
                self.http
                    .post(self.api(&path))
                    .json(&json!({ "removeLabelIds": ["UNREAD"] })),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use legalrelay_utils::AppConfig;
    use mockito::{Matcher, Server, ServerGuard};

    fn client_for(server: &ServerGuard) -> GmailClient {
        let mut config = AppConfig::default().mail;
        config.api_url = server.url();
        config.token_url = format!("{}/token", server.url());
        GmailClient::new(config).unwrap()
    }

    async fn mock_token(server: &mut ServerGuard, hits: usize) -> mockito::Mock {
        server
            .mock("POST", "/token")
            .match_body(Matcher::Regex("grant_type=refresh_token".to_string()))
            .with_status(200)
            .with_body(r#"{"access_token":"at-1","expires_in":3600}"#)
            .expect(hits)
            .create_async()
            .await
    }

    fn outbound(thread_id: Option<&str>) -> OutboundEmail {
        OutboundEmail {
            to: "client@x.com".to_string(),
            subject: "New messages for case: Smith v. Jones".to_string(),
            body: "Hello <b>there</b>".to_string(),
            attachments: vec![],
            recipient_role: RecipientRole::Client,
            thread_id: thread_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_list_unread_reuses_access_token() {
        let mut server = Server::new_async().await;
        let token = mock_token(&mut server, 1).await;
        let list = server
            .mock("GET", "/messages")
            .match_header("authorization", "Bearer at-1")
            .match_query(Matcher::UrlEncoded("q".into(), UNREAD_QUERY.into()))
            .with_status(200)
            .with_body(r#"{"messages":[{"id":"m1","threadId":"t1"}],"resultSizeEstimate":1}"#)
            .expect(2)
            .create_async()
            .await;

        let client = client_for(&server);
        let first = client.list_unread().await.unwrap();
        let second = client.list_unread().await.unwrap();

        assert_eq!(first, vec![EmailSummary { id: "m1".into(), thread_id: "t1".into() }]);
        assert_eq!(first, second);
        token.assert_async().await;
        list.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_failure_is_auth_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        assert!(matches!(client.list_unread().await, Err(MailError::Auth(_))));
    }

    #[tokio::test]
    async fn test_get_message_decodes_parts() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server, 1).await;

        let plain = URL_SAFE_NO_PAD.encode("New reply text\n\nOn Mon, Jan 1 wrote:\n> old");
        let html = URL_SAFE_NO_PAD.encode("<div>New reply text</div>");
        let body = json!({
            "id": "m1",
            "threadId": "t1",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [
                    {"name": "From", "value": "Cal <client@x.com>"},
                    {"name": "Subject", "value": "Re: New messages for case: Smith"}
                ],
                "body": {},
                "parts": [
                    {"mimeType": "multipart/alternative", "body": {}, "parts": [
                        {"mimeType": "text/html", "body": {"data": html}},
                        {"mimeType": "text/plain", "body": {"data": plain}}
                    ]},
                    {"mimeType": "application/pdf", "filename": "signed.pdf", "body": {"attachmentId": "a1"}}
                ]
            }
        });
        let _mock = server
            .mock("GET", "/messages/m1")
            .match_query(Matcher::UrlEncoded("format".into(), "full".into()))
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;
        let _mock = server
            .mock("GET", "/messages/m1/attachments/a1")
            .with_status(200)
            .with_body(json!({ "data": URL_SAFE_NO_PAD.encode(b"%PDF-1.4") }).to_string())
            .create_async()
            .await;

        let client = client_for(&server);
        let message = client.get_message("m1").await.unwrap();

        assert_eq!(message.thread_id, "t1");
        assert_eq!(message.sender, "Cal <client@x.com>");
        assert!(message.body.starts_with("New reply text"));
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].filename, "signed.pdf");
        assert_eq!(message.attachments[0].data, b"%PDF-1.4".to_vec());
    }

    #[tokio::test]
    async fn test_send_passes_thread_id() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server, 1).await;
        let send = server
            .mock("POST", "/messages/send")
            .match_body(Matcher::PartialJson(json!({ "threadId": "t1" })))
            .with_status(200)
            .with_body(r#"{"id":"m2","threadId":"t1","labelIds":["SENT"]}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let sent = client.send(&outbound(Some("t1"))).await.unwrap();

        assert_eq!(sent, SentEmail { message_id: "m2".into(), thread_id: "t1".into() });
        send.assert_async().await;
    }

    #[tokio::test]
    async fn test_mark_read_removes_unread_label() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server, 1).await;
        let modify = server
            .mock("POST", "/messages/m1/modify")
            .match_body(Matcher::PartialJson(json!({ "removeLabelIds": ["UNREAD"] })))
            .with_status(200)
            .with_body(r#"{"id":"m1","labelIds":["INBOX"]}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        client.mark_read("m1").await.unwrap();
        modify.assert_async().await;
    }

    #[test]
    fn test_build_message_threading_headers() {
        let client = GmailClient::new(AppConfig::default().mail).unwrap();

        let first = String::from_utf8(client.build_message(&outbound(None)).unwrap()).unwrap();
        assert!(!first.contains("In-Reply-To"));

        let follow_up = String::from_utf8(client.build_message(&outbound(Some("t1"))).unwrap()).unwrap();
        assert!(follow_up.contains("In-Reply-To: <thread-t1@legalrelay.local>"));
        assert!(follow_up.contains("References: <thread-t1@legalrelay.local>"));
        assert!(follow_up.contains("Subject: New messages for case: Smith v. Jones"));
    }

    #[test]
    fn test_notification_html_escapes_body_and_adds_footer() {
        let client = GmailClient::new(AppConfig::default().mail).unwrap();
        let html = client.render_html("Hello <b>there</b>\nBye", RecipientRole::Attorney).unwrap();

        assert!(html.contains("Hello &lt;b&gt;there&lt;/b&gt;<br>Bye"));
        assert!(html.contains("respond to this client directly"));
        assert!(html.contains("http://localhost:3001"));
    }

    #[test]
    fn test_invalid_recipient_is_compose_error() {
        let client = GmailClient::new(AppConfig::default().mail).unwrap();
        let mut email = outbound(None);
        email.to = "not an address".to_string();
        assert!(matches!(client.build_message(&email), Err(MailError::Compose(_))));
    }
}
