//! # Database: PostgreSQL Record Store
//!
//! Async storage for accounts, leads, chats and the outbox via
//! `sqlx::PgPool`. Queries are checked at runtime (`query_as::<_, Row>`);
//! the schema lives in `migrations/` and is applied by `sqlx::migrate!` when
//! the server starts.
//!
//! ## Schema
//!
//! - `users`: customers and employees, argon2 password hashes
//! - `service_requests`, `contact_forms`: customer records with a `version`
//! - `edit_history`: append-only audit trail for both record kinds
//! - `price_estimates`: wizard submissions, selections as JSONB
//! - `chats`, `chat_messages`: consultation sessions, messages in id order
//! - `questions`: public one-shot questions
//! - `outbox`: side-effect jobs written in the same transaction as their record
//!
//! ## Module Structure
//!
//! Operations are split into submodules by domain:
//!
//! - [`users`]: Registration, login lookup, employee approval
//! - [`service_requests`]: Service request CRUD with CAS updates
//! - [`contact_forms`]: Contact form CRUD with CAS updates
//! - [`estimates`]: Price estimate insert, list, status and annotations
//! - [`chats`]: Chat lifecycle transitions and messages
//! - [`questions`]: Public questions
//! - [`outbox`]: Job enqueue, claim (`FOR UPDATE SKIP LOCKED`), retry
//!
//! ## Conditional updates
//!
//! State transitions are single `UPDATE ... WHERE <expected state>`
//! statements. When nothing matched, the row is re-read to tell a missing
//! record from a lost race, reported as [`Outcome::NotFound`] and
//! [`Outcome::Conflict`].

mod chats;
mod contact_forms;
mod estimates;
mod outbox;
mod questions;
mod service_requests;
mod users;

pub use chats::ChatWithMessages;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::error::ApiError;

// ── Account types ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub status: String,
    pub phone: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Record types ────────────────────────────────────────────────

/// Service request joined with the owner's display name.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceRequestRow {
    pub id: i64,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub subject: String,
    pub description: String,
    pub category: String,
    pub status: String,
    pub priority: String,
    pub product_name: Option<String>,
    pub product_serial_number: Option<String>,
    pub product_purchase_date: Option<NaiveDate>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ContactFormRow {
    pub id: i64,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: String,
    pub message: String,
    pub status: String,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EditHistoryRow {
    pub id: i64,
    #[serde(skip_serializing)]
    pub record_id: i64,
    pub edited_by: Option<Uuid>,
    pub edited_by_name: String,
    pub edited_at: DateTime<Utc>,
    pub note: Option<String>,
    pub previous_status: String,
    pub new_status: String,
}

/// Which table an `edit_history` row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    ServiceRequest,
    ContactForm,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::ServiceRequest => "service_request",
            RecordKind::ContactForm => "contact_form",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PriceEstimateRow {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub converted: bool,
    pub initial_selection: Option<Value>,
    pub current_selection: Value,
    pub contact_info: Value,
    pub appointment_date: Option<NaiveDate>,
    pub appointment_time: Option<String>,
    pub price: Option<i32>,
    pub manual_quote: bool,
    pub ip_address: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub status: String,
    pub memo: String,
    pub version: i32,
}

// ── Chat types ──────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatRow {
    pub id: i64,
    pub session_id: String,
    pub customer_name: String,
    pub status: String,
    pub accepted_by: String,
    pub accepted_at: Option<DateTime<Utc>>,
    pub ended_by: String,
    pub ended_at: Option<DateTime<Utc>>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatMessageRow {
    pub id: i64,
    pub chat_id: i64,
    pub text: String,
    pub sender: String,
    pub employee_name: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRow {
    pub id: i64,
    pub phone: String,
    pub question: String,
    pub ip_address: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

// ── Outbox types ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OutboxRow {
    pub id: i64,
    pub kind: String,
    pub payload: Value,
    pub status: String,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, sqlx::FromRow)]
pub struct OutboxSummary {
    pub pending: i64,
    pub in_flight: i64,
    pub failed: i64,
}

// ── Transition outcome ──────────────────────────────────────────

/// Result of a conditional update.
#[derive(Debug)]
pub enum Outcome<T> {
    Done(T),
    NotFound,
    /// The row exists but was not in the expected state.
    Conflict(String),
}

impl<T> Outcome<T> {
    /// Map onto the HTTP error taxonomy, naming the record in a 404.
    pub fn into_result(self, what: &str) -> Result<T, ApiError> {
        match self {
            Outcome::Done(v) => Ok(v),
            Outcome::NotFound => Err(ApiError::NotFound(format!("{} not found", what))),
            Outcome::Conflict(msg) => Err(ApiError::Conflict(msg)),
        }
    }
}

// ── Database struct and connection ──────────────────────────────

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL using the provided database URL.
    ///
    /// Parses the URL by hand so percent-encoded credentials survive intact
    /// (managed poolers put a project suffix in the username).
    pub async fn connect(database_url: &str) -> Result<Self> {
        let url = url::Url::parse(database_url)?;
        let username = urlencoding::decode(url.username())?.into_owned();
        let password = url
            .password()
            .map(|p| urlencoding::decode(p).map(|s| s.into_owned()))
            .transpose()?;
        let mut opts = PgConnectOptions::new()
            .host(url.host_str().unwrap_or("localhost"))
            .port(url.port().unwrap_or(5432))
            .database(url.path().trim_start_matches('/'))
            .username(&username)
            .statement_cache_capacity(0);
        if let Some(ref pw) = password {
            opts = opts.password(pw);
        }
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_with(opts)
            .await?;
        Ok(Database { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Database { pool }
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations from `migrations/`.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Health check: execute `SELECT 1` to verify database connectivity.
    ///
    /// Used by the `/readyz` readiness check.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    /// Edit history for a set of records, oldest first.
    pub async fn get_edit_history(
        &self,
        kind: RecordKind,
        record_ids: &[i64],
    ) -> Result<Vec<EditHistoryRow>> {
        let rows = sqlx::query_as::<_, EditHistoryRow>(
            "SELECT id, record_id, edited_by, edited_by_name, edited_at, note,
                    previous_status, new_status
             FROM edit_history
             WHERE record_kind = $1 AND record_id = ANY($2)
             ORDER BY id",
        )
        .bind(kind.as_str())
        .bind(record_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// Append one audit entry inside the caller's transaction.
pub(crate) async fn insert_edit_history(
    conn: &mut sqlx::PgConnection,
    kind: RecordKind,
    record_id: i64,
    entry: &crate::records::HistoryEntry,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO edit_history
            (record_kind, record_id, edited_by, edited_by_name, note, previous_status, new_status)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(kind.as_str())
    .bind(record_id)
    .bind(entry.edited_by)
    .bind(&entry.edited_by_name)
    .bind(&entry.note)
    .bind(&entry.previous_status)
    .bind(&entry.new_status)
    .execute(conn)
    .await?;
    Ok(())
}

/// Group history rows by record id, preserving order.
pub fn group_history(
    rows: Vec<EditHistoryRow>,
) -> std::collections::HashMap<i64, Vec<EditHistoryRow>> {
    let mut map: std::collections::HashMap<i64, Vec<EditHistoryRow>> =
        std::collections::HashMap::new();
    for row in rows {
        map.entry(row.record_id).or_default().push(row);
    }
    map
}

// ── Tests ───────────────────────────────────────────────────────
