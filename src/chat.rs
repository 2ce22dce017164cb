//! # Chat: Consultation Session Lifecycle
//!
//! ```text
//! (none) ──request──▶ pending ──accept──▶ active ──end──▶ ended
//!                        │                   │
//!                        └───── cancel ──▶ (deleted)
//!                        └────────────── end ───────────▶ ended
//! ```
//!
//! Every transition is a conditional `UPDATE ... WHERE status = ...` in
//! `db::chats`, so two employees racing to accept the same chat cannot both
//! win: the loser gets `Conflict` naming the current holder. The helpers
//! here decide which transitions are legal and phrase the conflicts.
//!
//! Session ids are generated by the client and are the chat's public key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{ChatMessageRow, ChatRow};
use crate::error::ApiError;

pub const DEFAULT_CUSTOMER_NAME: &str = "고객";
pub const MAX_SESSION_ID_LEN: usize = 128;
pub const MAX_MESSAGE_LEN: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    Pending,
    Active,
    Ended,
}

impl ChatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatStatus::Pending => "pending",
            ChatStatus::Active => "active",
            ChatStatus::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ChatStatus::Pending),
            "active" => Some(ChatStatus::Active),
            "ended" => Some(ChatStatus::Ended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The customer.
    User,
    Employee,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Employee => "employee",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Sender::User),
            "employee" => Some(Sender::Employee),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub text: String,
    pub sender: Sender,
    pub employee_name: String,
    pub read: bool,
    pub timestamp: DateTime<Utc>,
}

impl From<ChatMessageRow> for ChatMessage {
    fn from(row: ChatMessageRow) -> Self {
        ChatMessage {
            id: row.id,
            text: row.text,
            sender: Sender::parse(&row.sender).unwrap_or(Sender::User),
            employee_name: row.employee_name,
            read: row.read,
            timestamp: row.created_at,
        }
    }
}

/// A chat with its messages in send order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub session_id: String,
    pub customer_name: String,
    pub status: ChatStatus,
    pub messages: Vec<ChatMessage>,
    pub accepted_by: String,
    pub accepted_at: Option<DateTime<Utc>>,
    pub ended_by: String,
    pub ended_at: Option<DateTime<Utc>>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl Chat {
    pub fn from_rows(row: ChatRow, messages: Vec<ChatMessageRow>) -> Self {
        Chat {
            session_id: row.session_id,
            customer_name: row.customer_name,
            status: ChatStatus::parse(&row.status).unwrap_or(ChatStatus::Pending),
            messages: messages.into_iter().map(ChatMessage::from).collect(),
            accepted_by: row.accepted_by,
            accepted_at: row.accepted_at,
            ended_by: row.ended_by,
            ended_at: row.ended_at,
            version: row.version,
            created_at: row.created_at,
            last_update: row.last_update,
        }
    }

    pub fn unread_from(&self, sender: Sender) -> usize {
        self.messages
            .iter()
            .filter(|m| m.sender == sender && !m.read)
            .count()
    }
}

/// Client-chosen ids: non-empty, bounded, URL-safe.
pub fn validate_session_id(session_id: &str) -> Result<(), ApiError> {
    let ok = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(ApiError::validation(
            "sessionId must be 1-128 characters of [A-Za-z0-9_-]",
        ))
    }
}

pub fn customer_name_or_default(name: Option<&str>) -> String {
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_CUSTOMER_NAME)
        .to_string()
}

pub fn validate_message_text(text: &str) -> Result<String, ApiError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("text must not be empty"));
    }
    if trimmed.chars().count() > MAX_MESSAGE_LEN {
        return Err(ApiError::validation(format!(
            "text must be at most {} characters",
            MAX_MESSAGE_LEN
        )));
    }
    Ok(trimmed.to_string())
}

// ── Transition rules ────────────────────────────────────────────

pub fn can_accept(status: ChatStatus) -> bool {
    status == ChatStatus::Pending
}

pub fn can_end(status: ChatStatus) -> bool {
    status != ChatStatus::Ended
}

pub fn can_send(status: ChatStatus) -> bool {
    status != ChatStatus::Ended
}

pub fn can_cancel(status: ChatStatus) -> bool {
    status == ChatStatus::Pending
}

/// Why an accept lost, given the chat as it now stands.
pub fn accept_conflict(status: ChatStatus, accepted_by: &str) -> ApiError {
    match status {
        ChatStatus::Active => ApiError::Conflict(format!(
            "Chat already accepted by {}",
            if accepted_by.is_empty() { "another employee" } else { accepted_by }
        )),
        ChatStatus::Ended => ApiError::Conflict("Chat has already ended".into()),
        ChatStatus::Pending => ApiError::Conflict("Chat changed concurrently, retry".into()),
    }
}

pub fn ended_conflict() -> ApiError {
    ApiError::Conflict("Chat has already ended".into())
}

pub fn cancel_conflict(status: ChatStatus) -> ApiError {
    ApiError::Conflict(format!(
        "Only pending chats can be cancelled (chat is {})",
        status.as_str()
    ))
}
