//! Sendbird Platform API (v3) adapter.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

use legalrelay_models::{ChannelRef, ChatChannel, ChatMessage, ChatUser};
use legalrelay_utils::ChatConfig;

use super::{ChatError, ChatProvider, THREAD_ID_METADATA_KEY};

/// Resource does not exist (channel without metadata, unknown user, ...).
const RESOURCE_NOT_FOUND: i64 = 400201;

pub struct SendbirdClient {
    http: Client,
    base_url: String,
    api_token: String,
    sessions: RwLock<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct MemberPage {
    #[serde(default)]
    members: Vec<ChatUser>,
    #[serde(default)]
    next: String,
}

#[derive(Debug, Deserialize)]
struct SessionToken {
    token: String,
}

#[derive(Debug, Deserialize)]
struct MessageUser {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
    channel_url: String,
    #[serde(default)]
    message: String,
    user: MessageUser,
}

#[derive(Debug, Deserialize)]
struct ChannelMember {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct ChannelBody {
    channel_url: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    members: Vec<ChannelMember>,
}

#[derive(Debug, Deserialize)]
struct ChannelList {
    #[serde(default)]
    channels: Vec<ChannelBody>,
}

impl SendbirdClient {
    pub fn new(config: &ChatConfig) -> Self {
        Self::with_base_url(config.base_url(), config.api_token.clone())
    }

    pub fn with_base_url(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("Api-Token", &self.api_token)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ChatError> {
        let response = check(request.send().await?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))
    }
}

async fn check(response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiErrorBody>(&text) {
        Ok(body) if body.code != 0 => Err(ChatError::Api {
            code: body.code,
            message: body.message,
        }),
        _ => Err(ChatError::Api {
            code: i64::from(status.as_u16()),
            message: text,
        }),
    }
}

#[async_trait]
impl ChatProvider for SendbirdClient {
    async fn connect(&self, user_id: &str) -> Result<String, ChatError> {
        if let Some(token) = self.sessions.read().await.get(user_id) {
            return Ok(token.clone());
        }

        let path = format!("/users/{}/token", urlencoding::encode(user_id));
        let session: SessionToken = self
            .send(self.request(reqwest::Method::POST, &path).json(&json!({})))
            .await?;

        self.sessions
            .write()
            .await
            .insert(user_id.to_string(), session.token.clone());
        Ok(session.token)
    }

    async fn channel_members(&self, channel_url: &str) -> Result<Vec<ChatUser>, ChatError> {
        let path = format!("/group_channels/{}/members", urlencoding::encode(channel_url));
        let mut members = Vec::new();
        let mut next = String::new();

        loop {
            let mut request = self
                .request(reqwest::Method::GET, &path)
                .query(&[("limit", "100")]);
            if !next.is_empty() {
                request = request.query(&[("token", next.as_str())]);
            }

            let page: MemberPage = self.send(request).await?;
            members.extend(page.members);
            if page.next.is_empty() {
                break;
            }
            next = page.next;
        }

        Ok(members)
    }

    async fn get_user(&self, user_id: &str) -> Result<ChatUser, ChatError> {
        let path = format!("/users/{}", urlencoding::encode(user_id));
        self.send(self.request(reqwest::Method::GET, &path)).await
    }

    async fn send_message(
        &self,
        channel_url: &str,
        user_id: &str,
        text: &str,
    ) -> Result<ChatMessage, ChatError> {
        let path = format!("/group_channels/{}/messages", urlencoding::encode(channel_url));
        let body = json!({
            "message_type": "MESG",
            "user_id": user_id,
            "message": text,
        });

        let sent: SentMessage = self
            .send(self.request(reqwest::Method::POST, &path).json(&body))
            .await?;

        Ok(ChatMessage {
            message_id: sent.message_id,
            channel_url: sent.channel_url,
            user_id: sent.user.user_id,
            message: sent.message,
        })
    }

    async fn get_file(&self, url: &str, session_token: &str) -> Result<Vec<u8>, ChatError> {
        let request = self
            .http
            .get(url)
            .query(&[("auth", session_token)])
            .header("Api-Token", &self.api_token)
            .header("Session-Token", session_token);

        let response = check(request.send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn create_channel(&self, user_ids: &[String]) -> Result<ChatChannel, ChatError> {
        let body = json!({ "user_ids": user_ids, "is_distinct": true });
        let channel: ChannelBody = self
            .send(self.request(reqwest::Method::POST, "/group_channels").json(&body))
            .await?;

        Ok(ChatChannel {
            channel_url: channel.channel_url,
            name: channel.name,
            member_ids: channel.members.into_iter().map(|m| m.user_id).collect(),
        })
    }

    async fn channel_metadata(
        &self,
        channel_url: &str,
        keys: &[&str],
    ) -> Result<HashMap<String, String>, ChatError> {
        let path = format!("/group_channels/{}/metadata", urlencoding::encode(channel_url));
        let request = self
            .request(reqwest::Method::GET, &path)
            .query(&[("keys", keys.join(","))]);

        match self.send::<HashMap<String, String>>(request).await {
            Ok(metadata) => Ok(metadata),
            Err(ChatError::Api { code, .. }) if code == RESOURCE_NOT_FOUND => Ok(HashMap::new()),
            Err(err) => Err(err),
        }
    }

    async fn put_channel_metadata(
        &self,
        channel_url: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ChatError> {
        let path = format!("/group_channels/{}/metadata", urlencoding::encode(channel_url));
        let body = json!({ "metadata": { key: value }, "upsert": true });

        let _: HashMap<String, String> = self
            .send(self.request(reqwest::Method::PUT, &path).json(&body))
            .await?;
        Ok(())
    }

    async fn find_channel_by_thread_id(
        &self,
        thread_id: &str,
    ) -> Result<Option<ChannelRef>, ChatError> {
        let request = self.request(reqwest::Method::GET, "/group_channels").query(&[
            ("metadata_key", THREAD_ID_METADATA_KEY),
            ("metadata_values", thread_id),
            ("show_member", "false"),
            ("limit", "1"),
        ]);

        let list: ChannelList = self.send(request).await?;
        Ok(list.channels.into_iter().next().map(|channel| ChannelRef {
            channel_url: channel.channel_url,
            name: channel.name,
        }))
    }

    async fn reconnect(&self) {
        let mut sessions = self.sessions.write().await;
        tracing::info!(dropped = sessions.len(), "Dropping cached chat sessions");
        sessions.clear();
    }
}
