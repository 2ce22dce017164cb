//! Chat sessions and their messages.
//!
//! Transitions are conditional updates on `status`; see [`crate::chat`] for
//! the state machine. Appending a message locks the chat row so a message
//! cannot slip in after a concurrent `end`.

use super::outbox::enqueue;
use super::{ChatMessageRow, ChatRow, Database, Outcome};
use crate::chat::{self, ChatStatus, Sender};
use crate::notify::{Notification, TranscriptLine};
use crate::outbox::Job;
use anyhow::Result;
use chrono::Utc;

const CHAT_COLUMNS: &str = "id, session_id, customer_name, status, accepted_by, accepted_at,
    ended_by, ended_at, version, created_at, last_update";

const MESSAGE_COLUMNS: &str = "id, chat_id, text, sender, employee_name, read, created_at";

pub type ChatWithMessages = (ChatRow, Vec<ChatMessageRow>);

impl Database {
    /// Open a pending chat unless the session already has one. Returns the
    /// chat and whether it was created by this call.
    pub async fn create_chat_if_absent(
        &self,
        session_id: &str,
        customer_name: &str,
    ) -> Result<(ChatWithMessages, bool)> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "INSERT INTO chats (session_id, customer_name)
             VALUES ($1, $2)
             ON CONFLICT (session_id) DO NOTHING
             RETURNING {}",
            CHAT_COLUMNS
        );
        let created = sqlx::query_as::<_, ChatRow>(&sql)
            .bind(session_id)
            .bind(customer_name)
            .fetch_optional(&mut *tx)
            .await?;
        match created {
            Some(row) => {
                let job = Job::notify(Notification::NewChat {
                    session_id: row.session_id.clone(),
                    customer_name: row.customer_name.clone(),
                    requested_at: row.created_at,
                });
                enqueue(&mut *tx, &job).await?;
                tx.commit().await?;
                Ok(((row, Vec::new()), true))
            }
            None => {
                tx.rollback().await?;
                let existing = self
                    .get_chat(session_id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("chat {} vanished after conflict", session_id))?;
                Ok((existing, false))
            }
        }
    }

    pub async fn get_chat(&self, session_id: &str) -> Result<Option<ChatWithMessages>> {
        let sql = format!("SELECT {} FROM chats WHERE session_id = $1", CHAT_COLUMNS);
        let Some(row) = sqlx::query_as::<_, ChatRow>(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let messages = self.chat_messages(&[row.id]).await?;
        Ok(Some((row, messages)))
    }

    /// All chats, most recent activity first, each with its messages.
    pub async fn list_chats(&self) -> Result<Vec<ChatWithMessages>> {
        let sql = format!(
            "SELECT {} FROM chats ORDER BY last_update DESC, id DESC",
            CHAT_COLUMNS
        );
        let rows = sqlx::query_as::<_, ChatRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut by_chat: std::collections::HashMap<i64, Vec<ChatMessageRow>> =
            std::collections::HashMap::new();
        for m in self.chat_messages(&ids).await? {
            by_chat.entry(m.chat_id).or_default().push(m);
        }
        Ok(rows
            .into_iter()
            .map(|r| {
                let msgs = by_chat.remove(&r.id).unwrap_or_default();
                (r, msgs)
            })
            .collect())
    }

    async fn chat_messages(&self, chat_ids: &[i64]) -> Result<Vec<ChatMessageRow>> {
        let sql = format!(
            "SELECT {} FROM chat_messages WHERE chat_id = ANY($1) ORDER BY id",
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query_as::<_, ChatMessageRow>(&sql)
            .bind(chat_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// `pending -> active`. Losing a race yields a conflict naming the
    /// current holder.
    pub async fn accept_chat(
        &self,
        session_id: &str,
        employee_name: &str,
    ) -> Result<Outcome<ChatWithMessages>> {
        let updated: Option<i64> = sqlx::query_scalar(
            "UPDATE chats
             SET status = 'active', accepted_by = $2, accepted_at = NOW(),
                 version = version + 1, last_update = NOW()
             WHERE session_id = $1 AND status = 'pending'
             RETURNING id",
        )
        .bind(session_id)
        .bind(employee_name)
        .fetch_optional(&self.pool)
        .await?;

        let current = self.get_chat(session_id).await?;
        Ok(match (updated, current) {
            (_, None) => Outcome::NotFound,
            (Some(_), Some(chat)) => Outcome::Done(chat),
            (None, Some((row, _))) => {
                let status = ChatStatus::parse(&row.status).unwrap_or(ChatStatus::Pending);
                Outcome::Conflict(chat::accept_conflict(status, &row.accepted_by).to_string())
            }
        })
    }

    /// `pending|active -> ended`, queueing the transcript summary in the same
    /// transaction.
    pub async fn end_chat(
        &self,
        session_id: &str,
        ended_by: &str,
    ) -> Result<Outcome<ChatWithMessages>> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "UPDATE chats
             SET status = 'ended', ended_by = $2, ended_at = NOW(),
                 version = version + 1, last_update = NOW()
             WHERE session_id = $1 AND status <> 'ended'
             RETURNING {}",
            CHAT_COLUMNS
        );
        let Some(row) = sqlx::query_as::<_, ChatRow>(&sql)
            .bind(session_id)
            .bind(ended_by)
            .fetch_optional(&mut *tx)
            .await?
        else {
            tx.rollback().await?;
            return Ok(match self.get_chat(session_id).await? {
                None => Outcome::NotFound,
                Some(_) => Outcome::Conflict(chat::ended_conflict().to_string()),
            });
        };

        let sql = format!(
            "SELECT {} FROM chat_messages WHERE chat_id = $1 ORDER BY id",
            MESSAGE_COLUMNS
        );
        let messages = sqlx::query_as::<_, ChatMessageRow>(&sql)
            .bind(row.id)
            .fetch_all(&mut *tx)
            .await?;
        let summary = Notification::ChatSummary {
            customer_name: row.customer_name.clone(),
            accepted_at: row.accepted_at,
            ended_at: row.ended_at,
            ended_by: row.ended_by.clone(),
            messages: messages
                .iter()
                .map(|m| TranscriptLine {
                    sender: m.sender.clone(),
                    text: m.text.clone(),
                    timestamp: m.created_at,
                })
                .collect(),
        };
        enqueue(&mut *tx, &Job::notify(summary)).await?;
        tx.commit().await?;
        Ok(Outcome::Done((row, messages)))
    }

    /// Append a message. Ended chats refuse with a conflict.
    pub async fn append_message(
        &self,
        session_id: &str,
        text: &str,
        sender: Sender,
        employee_name: &str,
    ) -> Result<Outcome<ChatMessageRow>> {
        let mut tx = self.pool.begin().await?;
        let locked: Option<(i64, String)> = sqlx::query_as(
            "SELECT id, status FROM chats WHERE session_id = $1 FOR UPDATE",
        )
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((chat_id, status)) = locked else {
            tx.rollback().await?;
            return Ok(Outcome::NotFound);
        };
        let status = ChatStatus::parse(&status).unwrap_or(ChatStatus::Pending);
        if !chat::can_send(status) {
            tx.rollback().await?;
            return Ok(Outcome::Conflict(chat::ended_conflict().to_string()));
        }

        let sql = format!(
            "INSERT INTO chat_messages (chat_id, text, sender, employee_name, created_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {}",
            MESSAGE_COLUMNS
        );
        let message = sqlx::query_as::<_, ChatMessageRow>(&sql)
            .bind(chat_id)
            .bind(text)
            .bind(sender.as_str())
            .bind(employee_name)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await?;
        sqlx::query("UPDATE chats SET last_update = NOW() WHERE id = $1")
            .bind(chat_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Outcome::Done(message))
    }

    /// Flag every message from `sender` as read. `None` if the chat is
    /// missing, else the number of messages flipped.
    pub async fn mark_read(&self, session_id: &str, sender: Sender) -> Result<Option<u64>> {
        let chat_id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM chats WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(chat_id) = chat_id else {
            return Ok(None);
        };
        let result = sqlx::query(
            "UPDATE chat_messages SET read = TRUE
             WHERE chat_id = $1 AND sender = $2 AND NOT read",
        )
        .bind(chat_id)
        .bind(sender.as_str())
        .execute(&self.pool)
        .await?;
        Ok(Some(result.rows_affected()))
    }

    /// Customer cancellation: only a pending chat is deleted.
    pub async fn delete_pending_chat(&self, session_id: &str) -> Result<Outcome<()>> {
        let result = sqlx::query("DELETE FROM chats WHERE session_id = $1 AND status = 'pending'")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            return Ok(Outcome::Done(()));
        }
        Ok(match self.get_chat(session_id).await? {
            None => Outcome::NotFound,
            Some((row, _)) => {
                let status = ChatStatus::parse(&row.status).unwrap_or(ChatStatus::Pending);
                Outcome::Conflict(chat::cancel_conflict(status).to_string())
            }
        })
    }
}
