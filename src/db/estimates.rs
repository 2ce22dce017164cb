//! Price estimate storage.

use super::outbox::enqueue;
use super::{Database, Outcome, PriceEstimateRow};
use crate::outbox::Job;
use crate::records::{EstimateAnnotation, EstimateStatus};
use crate::wizard::Submission;
use anyhow::Result;
use chrono::{DateTime, Utc};

const ESTIMATE_COLUMNS: &str = "id, kind, converted, initial_selection, current_selection,
    contact_info, appointment_date, appointment_time, price, manual_quote, ip_address,
    submitted_at, status, memo, version";

impl Database {
    /// Insert a validated submission together with its mirror and
    /// notification jobs.
    pub async fn insert_estimate(
        &self,
        sub: &Submission,
        ip: &str,
        submitted_at: DateTime<Utc>,
        jobs: &[Job],
    ) -> Result<PriceEstimateRow> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "INSERT INTO price_estimates
                (kind, converted, initial_selection, current_selection, contact_info,
                 appointment_date, appointment_time, price, manual_quote, ip_address,
                 submitted_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {}",
            ESTIMATE_COLUMNS
        );
        let initial = sub
            .initial_selection
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let row = sqlx::query_as::<_, PriceEstimateRow>(&sql)
            .bind(sub.kind.as_str())
            .bind(sub.converted)
            .bind(initial)
            .bind(serde_json::to_value(&sub.current_selection)?)
            .bind(serde_json::to_value(&sub.contact_info)?)
            .bind(sub.appointment.date)
            .bind(&sub.appointment.time)
            .bind(sub.price.map(|p| p as i32))
            .bind(sub.manual_quote)
            .bind(ip)
            .bind(submitted_at)
            .fetch_one(&mut *tx)
            .await?;
        for job in jobs {
            enqueue(&mut *tx, job).await?;
        }
        tx.commit().await?;
        Ok(row)
    }

    /// Newest first, optionally narrowed by kind and status.
    pub async fn list_estimates(
        &self,
        kind: Option<&str>,
        status: Option<&str>,
    ) -> Result<Vec<PriceEstimateRow>> {
        let sql = format!(
            "SELECT {} FROM price_estimates
             WHERE ($1::text IS NULL OR kind = $1)
               AND ($2::text IS NULL OR status = $2)
             ORDER BY submitted_at DESC, id DESC",
            ESTIMATE_COLUMNS
        );
        let rows = sqlx::query_as::<_, PriceEstimateRow>(&sql)
            .bind(kind)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn get_estimate(&self, id: i64) -> Result<Option<PriceEstimateRow>> {
        let sql = format!("SELECT {} FROM price_estimates WHERE id = $1", ESTIMATE_COLUMNS);
        let row = sqlx::query_as::<_, PriceEstimateRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn update_estimate_status(
        &self,
        id: i64,
        version: i32,
        status: EstimateStatus,
    ) -> Result<Outcome<PriceEstimateRow>> {
        self.annotate_estimate(
            id,
            version,
            &EstimateAnnotation {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    /// Apply memo, status, contact and appointment edits if `version`
    /// still matches.
    pub async fn annotate_estimate(
        &self,
        id: i64,
        version: i32,
        changes: &EstimateAnnotation,
    ) -> Result<Outcome<PriceEstimateRow>> {
        let contact = changes
            .contact_info
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let appointment = changes.appointment.as_ref();
        let sql = format!(
            "UPDATE price_estimates
             SET memo = COALESCE($3, memo),
                 status = COALESCE($4, status),
                 contact_info = COALESCE($5, contact_info),
                 appointment_date = CASE WHEN $6 THEN $7 ELSE appointment_date END,
                 appointment_time = CASE WHEN $6 THEN $8 ELSE appointment_time END,
                 version = version + 1
             WHERE id = $1 AND version = $2
             RETURNING {}",
            ESTIMATE_COLUMNS
        );
        let row = sqlx::query_as::<_, PriceEstimateRow>(&sql)
            .bind(id)
            .bind(version)
            .bind(&changes.memo)
            .bind(changes.status.map(|s| s.as_str()))
            .bind(contact)
            .bind(appointment.is_some())
            .bind(appointment.and_then(|a| a.date))
            .bind(appointment.and_then(|a| a.time.clone()))
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            return Ok(Outcome::Done(row));
        }
        Ok(match self.get_estimate(id).await? {
            None => Outcome::NotFound,
            Some(current) => Outcome::Conflict(format!(
                "Record was modified by someone else (current version {}, you sent {})",
                current.version, version
            )),
        })
    }
}
