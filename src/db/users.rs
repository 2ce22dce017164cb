//! Account storage: registration, lookup, employee approval, profile edits.
//!
//! Usernames are stored lower-cased; the unique index on `username` is the
//! arbiter of "username taken".

use super::outbox::enqueue;
use super::{Database, UserRow};
use crate::auth::NewAccount;
use crate::outbox::Job;
use anyhow::Result;
use uuid::Uuid;

const USER_COLUMNS: &str =
    "id, name, username, password_hash, role, status, phone, email, created_at";

impl Database {
    /// Insert an account and its jobs in one transaction. `None` when the
    /// username is already taken.
    pub async fn create_user(
        &self,
        account: &NewAccount,
        password_hash: &str,
        jobs: &[Job],
    ) -> Result<Option<UserRow>> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "INSERT INTO users (name, username, password_hash, role, status, phone, email)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (username) DO NOTHING
             RETURNING {}",
            USER_COLUMNS
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&account.name)
            .bind(&account.username)
            .bind(password_hash)
            .bind(account.role.as_str())
            .bind(account.status.as_str())
            .bind(&account.phone)
            .bind(&account.email)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        for job in jobs {
            enqueue(&mut *tx, job).await?;
        }
        tx.commit().await?;
        Ok(Some(row))
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<UserRow>> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        let sql = format!("SELECT {} FROM users WHERE username = $1", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(username.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn username_exists(&self, username: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE username = $1)")
                .bind(username.trim().to_lowercase())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    /// Employees awaiting approval, oldest request first.
    pub async fn list_pending_employees(&self) -> Result<Vec<UserRow>> {
        let sql = format!(
            "SELECT {} FROM users
             WHERE role = 'employee' AND status = 'pending'
             ORDER BY created_at",
            USER_COLUMNS
        );
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Flip a pending employee to active. `None` if there is no such
    /// pending employee.
    pub async fn approve_employee(&self, id: Uuid) -> Result<Option<UserRow>> {
        let sql = format!(
            "UPDATE users SET status = 'active'
             WHERE id = $1 AND role = 'employee' AND status = 'pending'
             RETURNING {}",
            USER_COLUMNS
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Delete a pending employee. False if there is no such pending employee.
    pub async fn reject_employee(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM users WHERE id = $1 AND role = 'employee' AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Overwrite the given profile fields; `None` keeps the stored value.
    pub async fn update_user_details(
        &self,
        id: Uuid,
        name: Option<&str>,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Option<UserRow>> {
        let sql = format!(
            "UPDATE users
             SET name = COALESCE($2, name),
                 email = COALESCE($3, email),
                 phone = COALESCE($4, phone)
             WHERE id = $1
             RETURNING {}",
            USER_COLUMNS
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(name)
            .bind(email)
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Create or reset an active employee. Used by the `seed-employee` CLI
    /// command to bootstrap the first approver.
    pub async fn upsert_active_employee(
        &self,
        name: &str,
        username: &str,
        password_hash: &str,
        phone: &str,
    ) -> Result<UserRow> {
        let sql = format!(
            "INSERT INTO users (name, username, password_hash, role, status, phone)
             VALUES ($1, $2, $3, 'employee', 'active', $4)
             ON CONFLICT (username) DO UPDATE
             SET name = EXCLUDED.name,
                 password_hash = EXCLUDED.password_hash,
                 role = 'employee',
                 status = 'active',
                 phone = EXCLUDED.phone
             RETURNING {}",
            USER_COLUMNS
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(name)
            .bind(username.trim().to_lowercase())
            .bind(password_hash)
            .bind(phone)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }
}
