//! Public questions. Every change is mirrored to the 고객 질문 sheet through
//! the outbox.

use super::outbox::enqueue;
use super::{Database, QuestionRow};
use crate::notify::Notification;
use crate::outbox::Job;
use anyhow::Result;

const QUESTION_COLUMNS: &str = "id, phone, question, ip_address, read, created_at";

impl Database {
    /// Store the question and queue its sheet row and email.
    pub async fn insert_question(
        &self,
        phone: &str,
        question: &str,
        ip: &str,
    ) -> Result<QuestionRow> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "INSERT INTO questions (phone, question, ip_address)
             VALUES ($1, $2, $3)
             RETURNING {}",
            QUESTION_COLUMNS
        );
        let row = sqlx::query_as::<_, QuestionRow>(&sql)
            .bind(phone)
            .bind(question)
            .bind(ip)
            .fetch_one(&mut *tx)
            .await?;
        let jobs = [
            Job::MirrorQuestion {
                question_id: row.id,
                created_at: row.created_at,
                phone: row.phone.clone(),
                question: row.question.clone(),
                ip: row.ip_address.clone(),
            },
            Job::notify(Notification::NewQuestion {
                phone: row.phone.clone(),
                question: row.question.clone(),
                asked_at: row.created_at,
            }),
        ];
        for job in &jobs {
            enqueue(&mut *tx, job).await?;
        }
        tx.commit().await?;
        Ok(row)
    }

    /// Newest first.
    pub async fn list_questions(&self) -> Result<Vec<QuestionRow>> {
        let sql = format!(
            "SELECT {} FROM questions ORDER BY created_at DESC, id DESC",
            QUESTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, QuestionRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn set_question_read(&self, id: i64, read: bool) -> Result<Option<QuestionRow>> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "UPDATE questions SET read = $2 WHERE id = $1 RETURNING {}",
            QUESTION_COLUMNS
        );
        let row = sqlx::query_as::<_, QuestionRow>(&sql)
            .bind(id)
            .bind(read)
            .fetch_optional(&mut *tx)
            .await?;
        if row.is_some() {
            enqueue(&mut *tx, &Job::QuestionRead { question_id: id, read }).await?;
        }
        tx.commit().await?;
        Ok(row)
    }

    pub async fn delete_question(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM questions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            enqueue(&mut *tx, &Job::QuestionDelete { question_id: id }).await?;
        }
        tx.commit().await?;
        Ok(deleted)
    }
}
