//! Contact form storage. Same shape as service requests: owner join,
//! version CAS, audit entry in the update transaction.

use super::{insert_edit_history, ContactFormRow, Database, Outcome, RecordKind};
use crate::records::{ContactFormChanges, NewContactForm};
use anyhow::Result;
use uuid::Uuid;

const SELECT_CF: &str = "SELECT cf.id, cf.customer_id, u.name AS customer_name, cf.name,
            cf.email, cf.phone, cf.subject, cf.message, cf.status, cf.version,
            cf.created_at, cf.updated_at
     FROM contact_forms cf
     JOIN users u ON u.id = cf.customer_id";

impl Database {
    pub async fn insert_contact_form(
        &self,
        customer_id: Uuid,
        form: &NewContactForm,
    ) -> Result<ContactFormRow> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO contact_forms (customer_id, name, email, phone, subject, message)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(customer_id)
        .bind(&form.name)
        .bind(&form.email)
        .bind(&form.phone)
        .bind(&form.subject)
        .bind(&form.message)
        .fetch_one(&self.pool)
        .await?;
        self.get_contact_form(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("contact form {} vanished after insert", id))
    }

    pub async fn list_contact_forms(
        &self,
        customer: Option<Uuid>,
        status: Option<&str>,
    ) -> Result<Vec<ContactFormRow>> {
        let sql = format!(
            "{}
             WHERE ($1::uuid IS NULL OR cf.customer_id = $1)
               AND ($2::text IS NULL OR cf.status = $2)
             ORDER BY cf.created_at DESC, cf.id DESC",
            SELECT_CF
        );
        let rows = sqlx::query_as::<_, ContactFormRow>(&sql)
            .bind(customer)
            .bind(status.filter(|s| !s.is_empty()))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn get_contact_form(&self, id: i64) -> Result<Option<ContactFormRow>> {
        let sql = format!("{} WHERE cf.id = $1", SELECT_CF);
        let row = sqlx::query_as::<_, ContactFormRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn update_contact_form(
        &self,
        id: i64,
        version: i32,
        changes: &ContactFormChanges,
    ) -> Result<Outcome<ContactFormRow>> {
        let mut tx = self.pool.begin().await?;
        let updated: Option<i64> = sqlx::query_scalar(
            "UPDATE contact_forms
             SET status = COALESCE($3, status),
                 version = version + 1,
                 updated_at = NOW()
             WHERE id = $1 AND version = $2
             RETURNING id",
        )
        .bind(id)
        .bind(version)
        .bind(changes.status.map(|s| s.as_str()))
        .fetch_optional(&mut *tx)
        .await?;

        if updated.is_none() {
            tx.rollback().await?;
            return Ok(match self.get_contact_form(id).await? {
                None => Outcome::NotFound,
                Some(current) => Outcome::Conflict(format!(
                    "Record was modified by someone else (current version {}, you sent {})",
                    current.version, version
                )),
            });
        }
        if let Some(entry) = &changes.history {
            insert_edit_history(&mut *tx, RecordKind::ContactForm, id, entry).await?;
        }
        tx.commit().await?;

        match self.get_contact_form(id).await? {
            Some(row) => Ok(Outcome::Done(row)),
            None => Ok(Outcome::NotFound),
        }
    }

    pub async fn delete_contact_form(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM contact_forms WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM edit_history WHERE record_kind = $1 AND record_id = $2")
            .bind(RecordKind::ContactForm.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
