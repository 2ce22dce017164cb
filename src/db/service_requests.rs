//! Service request storage.
//!
//! Rows are always read joined with the owner's name. Updates are
//! compare-and-swap on `version`; the audit entry (if any) is written in the
//! same transaction as the update.

use super::{insert_edit_history, Database, Outcome, RecordKind, ServiceRequestRow};
use crate::records::{NewServiceRequest, RecordFilter, ServiceRequestChanges};
use anyhow::Result;
use uuid::Uuid;

const SELECT_SR: &str = "SELECT sr.id, sr.customer_id, u.name AS customer_name, sr.subject,
            sr.description, sr.category, sr.status, sr.priority, sr.product_name,
            sr.product_serial_number, sr.product_purchase_date, sr.version,
            sr.created_at, sr.updated_at
     FROM service_requests sr
     JOIN users u ON u.id = sr.customer_id";

impl Database {
    pub async fn insert_service_request(
        &self,
        customer_id: Uuid,
        req: &NewServiceRequest,
    ) -> Result<ServiceRequestRow> {
        let product = req.product_info.clone().unwrap_or_default();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO service_requests
                (customer_id, subject, description, category, priority,
                 product_name, product_serial_number, product_purchase_date)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id",
        )
        .bind(customer_id)
        .bind(&req.subject)
        .bind(&req.description)
        .bind(req.category.as_str())
        .bind(req.priority.as_str())
        .bind(&product.name)
        .bind(&product.serial_number)
        .bind(product.purchase_date)
        .fetch_one(&self.pool)
        .await?;
        self.get_service_request(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("service request {} vanished after insert", id))
    }

    /// Newest first. `customer` scopes the list to one owner.
    pub async fn list_service_requests(
        &self,
        customer: Option<Uuid>,
        filter: &RecordFilter,
    ) -> Result<Vec<ServiceRequestRow>> {
        let sql = format!(
            "{}
             WHERE ($1::uuid IS NULL OR sr.customer_id = $1)
               AND ($2::text IS NULL OR sr.status = $2)
               AND ($3::text IS NULL OR sr.category = $3)
               AND ($4::text IS NULL OR sr.priority = $4)
             ORDER BY sr.created_at DESC, sr.id DESC",
            SELECT_SR
        );
        let rows = sqlx::query_as::<_, ServiceRequestRow>(&sql)
            .bind(customer)
            .bind(filter.status.as_deref().filter(|s| !s.is_empty()))
            .bind(filter.category.as_deref().filter(|s| !s.is_empty()))
            .bind(filter.priority.as_deref().filter(|s| !s.is_empty()))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn get_service_request(&self, id: i64) -> Result<Option<ServiceRequestRow>> {
        let sql = format!("{} WHERE sr.id = $1", SELECT_SR);
        let row = sqlx::query_as::<_, ServiceRequestRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Apply `changes` if the stored version is still `version`.
    pub async fn update_service_request(
        &self,
        id: i64,
        version: i32,
        changes: &ServiceRequestChanges,
    ) -> Result<Outcome<ServiceRequestRow>> {
        let mut tx = self.pool.begin().await?;
        let product = changes.product_info.as_ref();
        let updated: Option<i64> = sqlx::query_scalar(
            "UPDATE service_requests
             SET subject = COALESCE($3, subject),
                 description = COALESCE($4, description),
                 status = COALESCE($5, status),
                 priority = COALESCE($6, priority),
                 product_name = CASE WHEN $7 THEN $8 ELSE product_name END,
                 product_serial_number = CASE WHEN $7 THEN $9 ELSE product_serial_number END,
                 product_purchase_date = CASE WHEN $7 THEN $10 ELSE product_purchase_date END,
                 version = version + 1,
                 updated_at = NOW()
             WHERE id = $1 AND version = $2
             RETURNING id",
        )
        .bind(id)
        .bind(version)
        .bind(&changes.subject)
        .bind(&changes.description)
        .bind(changes.status.map(|s| s.as_str()))
        .bind(changes.priority.map(|p| p.as_str()))
        .bind(product.is_some())
        .bind(product.and_then(|p| p.name.clone()))
        .bind(product.and_then(|p| p.serial_number.clone()))
        .bind(product.and_then(|p| p.purchase_date))
        .fetch_optional(&mut *tx)
        .await?;

        if updated.is_none() {
            tx.rollback().await?;
            return Ok(match self.get_service_request(id).await? {
                None => Outcome::NotFound,
                Some(current) => Outcome::Conflict(format!(
                    "Record was modified by someone else (current version {}, you sent {})",
                    current.version, version
                )),
            });
        }
        if let Some(entry) = &changes.history {
            insert_edit_history(&mut *tx, RecordKind::ServiceRequest, id, entry).await?;
        }
        tx.commit().await?;

        match self.get_service_request(id).await? {
            Some(row) => Ok(Outcome::Done(row)),
            None => Ok(Outcome::NotFound),
        }
    }

    /// Delete the request and its audit trail.
    pub async fn delete_service_request(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM service_requests WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM edit_history WHERE record_kind = $1 AND record_id = $2")
            .bind(RecordKind::ServiceRequest.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
