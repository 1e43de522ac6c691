//! In-process chat and mail providers for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use legalrelay_models::{
    ChannelRef, ChatChannel, ChatMessage, ChatUser, ChatUserMetadata, EmailMessage, EmailSummary,
    OutboundEmail, SentEmail,
};

use crate::providers::{ChatError, ChatProvider, MailError, MailProvider, THREAD_ID_METADATA_KEY};

pub fn chat_user(user_id: &str, role: &str) -> ChatUser {
    ChatUser {
        user_id: user_id.to_string(),
        nickname: String::new(),
        metadata: ChatUserMetadata {
            role: Some(role.to_string()).filter(|r| !r.is_empty()),
            email: None,
        },
    }
}

#[derive(Default)]
struct ChatState {
    members: HashMap<String, Vec<String>>,
    users: HashMap<String, ChatUser>,
    metadata: HashMap<String, HashMap<String, String>>,
    messages: Vec<ChatMessage>,
    files: HashMap<String, Vec<u8>>,
    sessions: Vec<String>,
    reconnects: usize,
    user_failures: HashMap<String, (i64, bool)>,
    members_failure: Option<i64>,
    failing_channels: HashSet<String>,
}

#[derive(Default)]
pub struct FakeChat {
    state: Mutex<ChatState>,
}

impl FakeChat {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChatState> {
        self.state.lock().unwrap()
    }

    pub fn add_channel(&self, channel_url: &str, members: Vec<ChatUser>) {
        let mut state = self.state();
        let ids = members.iter().map(|m| m.user_id.clone()).collect();
        for member in members {
            state.users.insert(member.user_id.clone(), member);
        }
        state.members.insert(channel_url.to_string(), ids);
    }

    pub fn add_member_without_profile(&self, channel_url: &str, user_id: &str) {
        self.state()
            .members
            .entry(channel_url.to_string())
            .or_default()
            .push(user_id.to_string());
    }

    pub fn add_file(&self, url: &str, data: &[u8]) {
        self.state().files.insert(url.to_string(), data.to_vec());
    }

    pub fn set_metadata(&self, channel_url: &str, key: &str, value: &str) {
        self.state()
            .metadata
            .entry(channel_url.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn metadata(&self, channel_url: &str, key: &str) -> Option<String> {
        self.state()
            .metadata
            .get(channel_url)
            .and_then(|m| m.get(key).cloned())
    }

    /// `get_user` for `user_id` keeps failing with `code`.
    pub fn fail_get_user_for(&self, user_id: &str, code: i64) {
        self.state().user_failures.insert(user_id.to_string(), (code, false));
    }

    /// Only the next `get_user` for `user_id` fails.
    pub fn fail_get_user_once_for(&self, user_id: &str, code: i64) {
        self.state().user_failures.insert(user_id.to_string(), (code, true));
    }

    pub fn fail_members_with(&self, code: i64) {
        self.state().members_failure = Some(code);
    }

    pub fn fail_messages_to(&self, channel_url: &str) {
        self.state().failing_channels.insert(channel_url.to_string());
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state().messages.clone()
    }

    /// Users a session token was issued for, in order.
    pub fn sessions(&self) -> Vec<String> {
        self.state().sessions.clone()
    }

    pub fn reconnects(&self) -> usize {
        self.state().reconnects
    }
}

fn api_error(code: i64, message: &str) -> ChatError {
    ChatError::Api { code, message: message.to_string() }
}

#[async_trait]
impl ChatProvider for FakeChat {
    async fn connect(&self, user_id: &str) -> Result<String, ChatError> {
        self.state().sessions.push(user_id.to_string());
        Ok(format!("session-{}", user_id))
    }

    async fn channel_members(&self, channel_url: &str) -> Result<Vec<ChatUser>, ChatError> {
        let state = self.state();
        if let Some(code) = state.members_failure {
            return Err(api_error(code, "members unavailable"));
        }
        let ids = state
            .members
            .get(channel_url)
            .ok_or_else(|| api_error(400201, "Channel not found"))?;
        Ok(ids
            .iter()
            .map(|id| ChatUser { user_id: id.clone(), ..Default::default() })
            .collect())
    }

    async fn get_user(&self, user_id: &str) -> Result<ChatUser, ChatError> {
        let mut state = self.state();
        if let Some((code, once)) = state.user_failures.get(user_id).copied() {
            if once {
                state.user_failures.remove(user_id);
            }
            return Err(api_error(code, "lookup failed"));
        }
        state
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| api_error(400201, "User not found"))
    }

    async fn send_message(
        &self,
        channel_url: &str,
        user_id: &str,
        text: &str,
    ) -> Result<ChatMessage, ChatError> {
        let mut state = self.state();
        if state.failing_channels.contains(channel_url) {
            return Err(api_error(500901, "message rejected"));
        }
        let message = ChatMessage {
            message_id: state.messages.len() as i64 + 1,
            channel_url: channel_url.to_string(),
            user_id: user_id.to_string(),
            message: text.to_string(),
        };
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn get_file(&self, url: &str, session_token: &str) -> Result<Vec<u8>, ChatError> {
        if session_token.is_empty() {
            return Err(api_error(400108, "session required"));
        }
        self.state()
            .files
            .get(url)
            .cloned()
            .ok_or_else(|| api_error(400201, "File not found"))
    }

    async fn create_channel(&self, user_ids: &[String]) -> Result<ChatChannel, ChatError> {
        let channel_url = format!("channel-{}", user_ids.join("-"));
        self.state()
            .members
            .insert(channel_url.clone(), user_ids.to_vec());
        Ok(ChatChannel { channel_url, name: None, member_ids: user_ids.to_vec() })
    }

    async fn channel_metadata(
        &self,
        channel_url: &str,
        keys: &[&str],
    ) -> Result<HashMap<String, String>, ChatError> {
        let state = self.state();
        let Some(metadata) = state.metadata.get(channel_url) else {
            return Ok(HashMap::new());
        };
        Ok(keys
            .iter()
            .filter_map(|k| metadata.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn put_channel_metadata(
        &self,
        channel_url: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ChatError> {
        self.set_metadata(channel_url, key, value);
        Ok(())
    }

    async fn find_channel_by_thread_id(
        &self,
        thread_id: &str,
    ) -> Result<Option<ChannelRef>, ChatError> {
        let state = self.state();
        Ok(state
            .metadata
            .iter()
            .find(|(_, m)| m.get(THREAD_ID_METADATA_KEY).map(String::as_str) == Some(thread_id))
            .map(|(url, _)| ChannelRef { channel_url: url.clone(), name: None }))
    }

    async fn reconnect(&self) {
        self.state().reconnects += 1;
    }
}

#[derive(Default)]
struct MailState {
    inbox: Vec<EmailMessage>,
    read: Vec<String>,
    sent: Vec<OutboundEmail>,
    failing_messages: HashSet<String>,
    send_failures: usize,
}

#[derive(Default)]
pub struct FakeMail {
    state: Mutex<MailState>,
}

impl FakeMail {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MailState> {
        self.state.lock().unwrap()
    }

    pub fn deliver(&self, message_id: &str, thread_id: &str, body: &str) {
        self.deliver_from(message_id, thread_id, "reply@x.com", body);
    }

    pub fn deliver_from(&self, message_id: &str, thread_id: &str, sender: &str, body: &str) {
        self.state().inbox.push(EmailMessage {
            message_id: message_id.to_string(),
            sender: sender.to_string(),
            subject: "Re: notification".to_string(),
            body: body.to_string(),
            attachments: vec![],
            thread_id: thread_id.to_string(),
        });
    }

    pub fn fail_fetch_of(&self, message_id: &str) {
        self.state().failing_messages.insert(message_id.to_string());
    }

    /// The next `count` sends fail.
    pub fn fail_sends(&self, count: usize) {
        self.state().send_failures = count;
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.state().sent.clone()
    }

    pub fn read_ids(&self) -> Vec<String> {
        self.state().read.clone()
    }
}

#[async_trait]
impl MailProvider for FakeMail {
    async fn list_unread(&self) -> Result<Vec<EmailSummary>, MailError> {
        let state = self.state();
        Ok(state
            .inbox
            .iter()
            .filter(|m| !state.read.contains(&m.message_id))
            .map(|m| EmailSummary { id: m.message_id.clone(), thread_id: m.thread_id.clone() })
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<EmailMessage, MailError> {
        let state = self.state();
        if state.failing_messages.contains(id) {
            return Err(MailError::Api { status: 500, message: "backend error".to_string() });
        }
        state
            .inbox
            .iter()
            .find(|m| m.message_id == id)
            .cloned()
            .ok_or_else(|| MailError::Api { status: 404, message: "Not Found".to_string() })
    }

    async fn send(&self, email: &OutboundEmail) -> Result<SentEmail, MailError> {
        let mut state = self.state();
        if state.send_failures > 0 {
            state.send_failures -= 1;
            return Err(MailError::Api { status: 503, message: "unavailable".to_string() });
        }
        state.sent.push(email.clone());
        let n = state.sent.len();
        Ok(SentEmail {
            message_id: format!("msg-{}", n),
            thread_id: email.thread_id.clone().unwrap_or_else(|| format!("thread-{}", n)),
        })
    }

    async fn mark_read(&self, id: &str) -> Result<(), MailError> {
        self.state().read.push(id.to_string());
        Ok(())
    }
}
