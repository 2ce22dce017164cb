//! # Client: HTTP Client and Chat Poller
//!
//! Async client for the `/api` surface, used by integrations, the CLI and
//! tests. Chat updates are pulled, not pushed:
//!
//! ```text
//! ChatPoller::run
//!   loop ─ fetch ─ ok ──▶ watch::Sender (latest snapshot) ─ sleep(interval)
//!            └──── err ──▶ sleep(min(interval · 2^failures, 30s))
//!   until CancellationToken fires
//! ```
//!
//! Customers poll their own session every second; employees poll the chat
//! list every two seconds. [`ClientSession`] owns the customer's session id:
//! created on first use, replaced by [`ClientSession::new_chat`].

use anyhow::{Context, Result};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chat::{Chat, ChatMessage, Sender};
use crate::db::QuestionRow;
use crate::wizard::Submission;

pub const CUSTOMER_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const EMPLOYEE_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const MAX_POLL_BACKOFF: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A non-2xx answer from the server.
#[derive(Debug, thiserror::Error)]
#[error("server answered {status}: {message}")]
pub struct ApiFailure {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: uuid::Uuid,
    pub name: String,
    pub username: String,
    pub role: String,
    pub status: String,
}

/// Result of `POST /api/auth/register`.
#[derive(Debug, Clone, PartialEq)]
pub enum Registered {
    /// Customers get a token immediately.
    Token(String),
    /// Employees wait for approval.
    Pending,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub username: String,
    pub password: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_code: Option<String>,
}

#[derive(Deserialize)]
struct TokenBody {
    token: String,
}

#[derive(Deserialize)]
struct ChatBody {
    chat: Option<Chat>,
}

#[derive(Deserialize)]
struct ChatsBody {
    chats: Vec<Chat>,
}

#[derive(Deserialize)]
struct MessageBody {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct QuestionBody {
    question: QuestionRow,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EstimateBody {
    estimate_id: i64,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building HTTP client")?;
        Ok(ApiClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(StatusCode, T)> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.request(method.clone(), &url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("{} {}", method, path))?;
        let status = resp.status();
        if !status.is_success() {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            let message = body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("request failed")
                .to_string();
            return Err(ApiFailure { status, message }.into());
        }
        let parsed = resp
            .json::<T>()
            .await
            .with_context(|| format!("decoding {} {}", method, path))?;
        Ok((status, parsed))
    }

    // ── Auth ────────────────────────────────────────────────────

    pub async fn register(&self, req: &RegisterRequest) -> Result<Registered> {
        let (status, body): (_, serde_json::Value) = self
            .call(Method::POST, "/api/auth/register", Some(serde_json::to_value(req)?))
            .await?;
        if status == StatusCode::ACCEPTED {
            return Ok(Registered::Pending);
        }
        let token = body
            .get("token")
            .and_then(|t| t.as_str())
            .context("register response carried no token")?;
        Ok(Registered::Token(token.to_string()))
    }

    /// Log in and keep the token for later calls.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<String> {
        let (_, body): (_, TokenBody) = self
            .call(
                Method::POST,
                "/api/auth/login",
                Some(json!({"username": username, "password": password})),
            )
            .await?;
        self.token = Some(body.token.clone());
        Ok(body.token)
    }

    pub async fn me(&self) -> Result<Account> {
        #[derive(Deserialize)]
        struct MeBody {
            user: Account,
        }
        let (_, body): (_, MeBody) = self.call(Method::GET, "/api/auth/me", None).await?;
        Ok(body.user)
    }

    // ── Estimates and questions ─────────────────────────────────

    /// Submit a full consultation; returns the stored estimate id.
    pub async fn submit_estimate(&self, sub: &Submission) -> Result<i64> {
        let (_, body): (_, EstimateBody) = self
            .call(Method::POST, "/api/price-estimate", Some(serde_json::to_value(sub)?))
            .await?;
        Ok(body.estimate_id)
    }

    pub async fn submit_quick(&self, sub: &Submission) -> Result<i64> {
        let (_, body): (_, EstimateBody) = self
            .call(
                Method::POST,
                "/api/price-estimate/quick",
                Some(serde_json::to_value(sub)?),
            )
            .await?;
        Ok(body.estimate_id)
    }

    pub async fn ask_question(&self, phone: &str, question: &str) -> Result<QuestionRow> {
        let (_, body): (_, QuestionBody) = self
            .call(
                Method::POST,
                "/api/notifications/question",
                Some(json!({"phone": phone, "question": question})),
            )
            .await?;
        Ok(body.question)
    }

    // ── Chat ────────────────────────────────────────────────────

    pub async fn request_chat(
        &self,
        session_id: &str,
        customer_name: Option<&str>,
    ) -> Result<Chat> {
        let (_, body): (_, ChatBody) = self
            .call(
                Method::POST,
                "/api/notifications/chat",
                Some(json!({"sessionId": session_id, "customerName": customer_name})),
            )
            .await?;
        body.chat.context("chat response carried no chat")
    }

    /// `None` when the session has no chat.
    pub async fn get_chat(&self, session_id: &str) -> Result<Option<Chat>> {
        let path = format!("/api/notifications/chat/{}", urlencoding::encode(session_id));
        let (_, body): (_, ChatBody) = self.call(Method::GET, &path, None).await?;
        Ok(body.chat)
    }

    pub async fn list_chats(&self) -> Result<Vec<Chat>> {
        let (_, body): (_, ChatsBody) = self
            .call(Method::GET, "/api/notifications/chats", None)
            .await?;
        Ok(body.chats)
    }

    pub async fn send_message(
        &self,
        session_id: &str,
        text: &str,
        sender: Sender,
    ) -> Result<ChatMessage> {
        let path = format!(
            "/api/notifications/chat/{}/message",
            urlencoding::encode(session_id)
        );
        let (_, body): (_, MessageBody) = self
            .call(
                Method::POST,
                &path,
                Some(json!({"text": text, "sender": sender.as_str()})),
            )
            .await?;
        Ok(body.message)
    }

    async fn chat_transition(
        &self,
        session_id: &str,
        action: &str,
        body: serde_json::Value,
    ) -> Result<Chat> {
        let path = format!(
            "/api/notifications/chat/{}/{}",
            urlencoding::encode(session_id),
            action
        );
        let (_, body): (_, ChatBody) = self.call(Method::PATCH, &path, Some(body)).await?;
        body.chat.context("chat response carried no chat")
    }

    pub async fn accept_chat(&self, session_id: &str) -> Result<Chat> {
        self.chat_transition(session_id, "accept", json!({})).await
    }

    pub async fn end_chat(&self, session_id: &str) -> Result<Chat> {
        self.chat_transition(session_id, "end", json!({})).await
    }

    /// Mark every message from `sender` as read.
    pub async fn mark_read(&self, session_id: &str, sender: Sender) -> Result<Chat> {
        self.chat_transition(session_id, "read", json!({"sender": sender.as_str()}))
            .await
    }

    pub async fn cancel_chat(&self, session_id: &str) -> Result<()> {
        let path = format!("/api/notifications/chat/{}", urlencoding::encode(session_id));
        let _: (_, serde_json::Value) = self.call(Method::DELETE, &path, None).await?;
        Ok(())
    }
}

// ── Session id ──────────────────────────────────────────────────

/// The customer's chat session id, created lazily.
#[derive(Debug, Default, Clone)]
pub struct ClientSession {
    session_id: Option<String>,
}

fn fresh_session_id() -> String {
    format!("chat_{}", uuid::Uuid::new_v4().simple())
}

impl ClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume a stored session id.
    pub fn resume(session_id: impl Into<String>) -> Self {
        ClientSession {
            session_id: Some(session_id.into()),
        }
    }

    pub fn session_id(&mut self) -> &str {
        self.session_id.get_or_insert_with(fresh_session_id)
    }

    /// Drop the current session (after an ended chat) and start another.
    pub fn new_chat(&mut self) -> &str {
        self.session_id.insert(fresh_session_id())
    }
}

// ── Poller ──────────────────────────────────────────────────────

/// What a poller watches.
#[derive(Debug, Clone)]
pub enum PollTarget {
    /// One session, as its customer sees it.
    Session(String),
    /// Every chat, as the employee dashboard sees them.
    AllChats,
}

impl PollTarget {
    pub fn default_interval(&self) -> Duration {
        match self {
            PollTarget::Session(_) => CUSTOMER_POLL_INTERVAL,
            PollTarget::AllChats => EMPLOYEE_POLL_INTERVAL,
        }
    }
}

/// Delay after `failures` consecutive failed polls.
pub fn poll_delay(interval: Duration, failures: u32, cap: Duration) -> Duration {
    if failures == 0 {
        return interval;
    }
    let factor = 1u32.checked_shl(failures.min(16)).unwrap_or(u32::MAX);
    interval.saturating_mul(factor).min(cap)
}

pub struct ChatPoller {
    client: ApiClient,
    target: PollTarget,
    interval: Duration,
    max_backoff: Duration,
}

impl ChatPoller {
    pub fn new(client: ApiClient, target: PollTarget) -> Self {
        let interval = target.default_interval();
        ChatPoller {
            client,
            target,
            interval,
            max_backoff: MAX_POLL_BACKOFF,
        }
    }

    pub fn with_interval(mut self, interval: Duration, max_backoff: Duration) -> Self {
        self.interval = interval;
        self.max_backoff = max_backoff;
        self
    }

    async fn fetch(&self) -> Result<Vec<Chat>> {
        match &self.target {
            PollTarget::Session(id) => Ok(self.client.get_chat(id).await?.into_iter().collect()),
            PollTarget::AllChats => self.client.list_chats().await,
        }
    }

    /// Poll until `cancel` fires, publishing each successful snapshot.
    pub async fn run(self, updates: watch::Sender<Vec<Chat>>, cancel: CancellationToken) {
        let mut failures: u32 = 0;
        loop {
            match self.fetch().await {
                Ok(chats) => {
                    failures = 0;
                    debug!(count = chats.len(), "chat poll");
                    if updates.send(chats).is_err() {
                        // Nobody is listening any more.
                        return;
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(error = %e, failures, "chat poll failed");
                }
            }
            let delay = poll_delay(self.interval, failures, self.max_backoff);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Spawn [`ChatPoller::run`] and hand back the snapshot receiver.
    pub fn spawn(
        self,
        cancel: CancellationToken,
    ) -> (tokio::task::JoinHandle<()>, watch::Receiver<Vec<Chat>>) {
        let (tx, rx) = watch::channel(Vec::new());
        let handle = tokio::spawn(self.run(tx, cancel));
        (handle, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_delay_backs_off_and_caps() {
        let one = Duration::from_secs(1);
        assert_eq!(poll_delay(one, 0, MAX_POLL_BACKOFF), one);
        assert_eq!(poll_delay(one, 1, MAX_POLL_BACKOFF), Duration::from_secs(2));
        assert_eq!(poll_delay(one, 4, MAX_POLL_BACKOFF), Duration::from_secs(16));
        assert_eq!(poll_delay(one, 5, MAX_POLL_BACKOFF), MAX_POLL_BACKOFF);
        assert_eq!(poll_delay(one, 200, MAX_POLL_BACKOFF), MAX_POLL_BACKOFF);
    }

    #[test]
    fn session_id_is_lazy_and_rotates() {
        let mut s = ClientSession::new();
        let first = s.session_id().to_string();
        assert!(first.starts_with("chat_"));
        assert_eq!(s.session_id(), first);
        let second = s.new_chat().to_string();
        assert_ne!(first, second);
        assert_eq!(s.session_id(), second);
        crate::chat::validate_session_id(&second).unwrap();
    }

    #[test]
    fn intervals_by_role() {
        assert_eq!(
            PollTarget::Session("s".into()).default_interval(),
            Duration::from_secs(1)
        );
        assert_eq!(PollTarget::AllChats.default_interval(), Duration::from_secs(2));
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let c = ApiClient::new("http://localhost:3000/").unwrap();
        assert_eq!(c.base_url, "http://localhost:3000");
        assert!(c.token().is_none());
        assert_eq!(c.with_token("t").token(), Some("t"));
    }
}
