//! Outbox job storage.
//!
//! Jobs are enqueued on the caller's transaction so they commit or roll back
//! with the record that caused them. The drain claims due jobs with
//! `FOR UPDATE SKIP LOCKED`, so several server instances can drain the same
//! table without executing a job twice concurrently.

use super::{Database, OutboxRow, OutboxSummary};
use crate::outbox::Job;
use anyhow::Result;
use std::time::Duration;

/// Queue a job on an open transaction.
pub(crate) async fn enqueue(conn: &mut sqlx::PgConnection, job: &Job) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO outbox (kind, payload) VALUES ($1, $2) RETURNING id",
    )
    .bind(job.kind())
    .bind(job.to_payload()?)
    .fetch_one(conn)
    .await?;
    Ok(id)
}

const OUTBOX_COLUMNS: &str = "id, kind, payload, status, attempts, next_attempt_at, last_error,
                              created_at, completed_at";

impl Database {
    /// Claim up to `limit` due jobs, marking them in flight and counting the
    /// attempt.
    pub async fn claim_due_jobs(&self, limit: i64) -> Result<Vec<OutboxRow>> {
        let sql = format!(
            "UPDATE outbox
             SET status = 'in_flight', claimed_at = NOW(), attempts = attempts + 1
             WHERE id IN (
                 SELECT id FROM outbox
                 WHERE status = 'pending' AND next_attempt_at <= NOW()
                 ORDER BY id
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {}",
            OUTBOX_COLUMNS
        );
        let mut rows = sqlx::query_as::<_, OutboxRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    pub async fn complete_job(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE outbox SET status = 'done', completed_at = NOW(), last_error = NULL
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn retry_job(&self, id: i64, error: &str, delay: Duration) -> Result<()> {
        sqlx::query(
            "UPDATE outbox
             SET status = 'pending', last_error = $2, claimed_at = NULL,
                 next_attempt_at = NOW() + make_interval(secs => $3)
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail_job(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE outbox SET status = 'failed', last_error = $2, completed_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Return jobs claimed more than `older_than_secs` ago to the queue.
    pub async fn reclaim_stale_jobs(&self, older_than_secs: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE outbox SET status = 'pending', claimed_at = NULL
             WHERE status = 'in_flight'
               AND claimed_at < NOW() - make_interval(secs => $1)",
        )
        .bind(older_than_secs as f64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete `done` jobs completed more than `older_than` ago. Failed jobs
    /// stay for the `outbox` command.
    pub async fn prune_done_jobs(&self, older_than: Duration) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox
             WHERE status = 'done'
               AND completed_at < NOW() - make_interval(secs => $1)",
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn outbox_summary(&self) -> Result<OutboxSummary> {
        let summary = sqlx::query_as::<_, OutboxSummary>(
            "SELECT COUNT(*) FILTER (WHERE status = 'pending')   AS pending,
                    COUNT(*) FILTER (WHERE status = 'in_flight') AS in_flight,
                    COUNT(*) FILTER (WHERE status = 'failed')    AS failed
             FROM outbox",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(summary)
    }

    /// Most recent jobs, optionally filtered by status.
    pub async fn list_jobs(&self, status: Option<&str>, limit: i64) -> Result<Vec<OutboxRow>> {
        let sql = format!(
            "SELECT {} FROM outbox
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY id DESC LIMIT $2",
            OUTBOX_COLUMNS
        );
        let rows = sqlx::query_as::<_, OutboxRow>(&sql)
            .bind(status)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
