//! Auth API: registration, login, profile, employee approval.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::middleware_auth::{RequireAuth, RequireEmployee};
use super::AppState;
use crate::auth::{self, AccountStatus, Registration, Role, MIN_PASSWORD_LEN};
use crate::db::UserRow;
use crate::error::ApiError;
use crate::notify::Notification;
use crate::outbox::Job;

/// Argon2 is deliberately slow; keep it off the async workers.
async fn hash(password: String) -> Result<String, ApiError> {
    let hashed = tokio::task::spawn_blocking(move || auth::hash_password(&password))
        .await
        .map_err(anyhow::Error::from)??;
    Ok(hashed)
}

async fn verify(password: String, phc: String) -> Result<bool, ApiError> {
    let ok = tokio::task::spawn_blocking(move || auth::verify_password(&password, &phc))
        .await
        .map_err(anyhow::Error::from)?;
    Ok(ok)
}

fn issue_token(state: &AppState, user: &UserRow) -> Result<String, ApiError> {
    let role = Role::parse(&user.role).unwrap_or(Role::Customer);
    Ok(state.tokens.issue(user.id, role)?)
}

/// POST /api/auth/register
///
/// Customers get `201` with a token. Employees get `202 {pending: true}`
/// and wait for an existing employee to approve them.
pub(super) async fn handler_register(
    State(state): State<Arc<AppState>>,
    Json(reg): Json<Registration>,
) -> Result<impl IntoResponse, ApiError> {
    let account = auth::validate_registration(&reg, state.config.employee_code.as_deref())?;
    let password_hash = hash(reg.password.clone()).await?;

    let mut jobs = Vec::new();
    if account.role == Role::Employee {
        jobs.push(Job::notify(Notification::EmployeeRegistration {
            name: account.name.clone(),
            username: account.username.clone(),
            phone: account.phone.clone(),
            requested_at: chrono::Utc::now(),
        }));
    }
    let user = state
        .db
        .create_user(&account, &password_hash, &jobs)
        .await?
        .ok_or_else(|| ApiError::Conflict("Username already exists".into()))?;
    info!(username = %user.username, role = %user.role, "account registered");

    if account.status == AccountStatus::Pending {
        return Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "success": true,
                "pending": true,
                "message": "가입 요청이 접수되었습니다. 관리자 승인 후 로그인하실 수 있습니다.",
            })),
        ));
    }
    let token = issue_token(&state, &user)?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({"success": true, "token": token, "user": user})),
    ))
}

#[derive(Deserialize)]
pub(super) struct LoginBody {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// POST /api/auth/login
pub(super) async fn handler_login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.username.trim().is_empty() || body.password.is_empty() {
        return Err(ApiError::validation("username and password are required"));
    }
    let invalid = || ApiError::Unauthorized("Invalid credentials".into());
    let user = state
        .db
        .get_user_by_username(&body.username)
        .await?
        .ok_or_else(invalid)?;
    if !verify(body.password, user.password_hash.clone()).await? {
        return Err(invalid());
    }
    if user.status == AccountStatus::Pending.as_str() {
        return Err(ApiError::Forbidden(
            "승인 대기 중입니다. 관리자의 승인 후 로그인할 수 있습니다.".into(),
        ));
    }
    let token = issue_token(&state, &user)?;
    Ok(Json(
        serde_json::json!({"success": true, "token": token, "user": user}),
    ))
}

#[derive(Deserialize)]
pub(super) struct UsernameBody {
    #[serde(default)]
    username: String,
}

/// POST /api/auth/check-username
pub(super) async fn handler_check_username(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UsernameBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.username.trim().is_empty() {
        return Err(ApiError::validation("username is required"));
    }
    let taken = state.db.username_exists(&body.username).await?;
    Ok(Json(serde_json::json!({"available": !taken})))
}

#[derive(Deserialize)]
pub(super) struct CodeBody {
    #[serde(default)]
    code: String,
}

/// POST /api/auth/verify-employee-code
pub(super) async fn handler_verify_employee_code(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CodeBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.code.trim().is_empty() {
        return Err(ApiError::validation("code is required"));
    }
    let valid =
        auth::employee_code_matches(state.config.employee_code.as_deref(), Some(body.code.trim()));
    Ok(Json(serde_json::json!({"valid": valid})))
}

async fn load_user(state: &AppState, id: uuid::Uuid) -> Result<UserRow, ApiError> {
    state
        .db
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))
}

/// GET /api/auth/me
pub(super) async fn handler_me(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let user = load_user(&state, actor.id).await?;
    Ok(Json(serde_json::json!({"success": true, "user": user})))
}

#[derive(Deserialize)]
pub(super) struct DetailsBody {
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

fn trimmed(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim)
}

/// PUT /api/auth/me
pub(super) async fn handler_update_details(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Json(body): Json<DetailsBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mut problems = Vec::new();
    if trimmed(&body.name) == Some("") {
        problems.push("name must not be empty".to_string());
    }
    if trimmed(&body.phone) == Some("") {
        problems.push("phone must not be empty".to_string());
    }
    if !problems.is_empty() {
        return Err(ApiError::Validation(problems));
    }
    let user = state
        .db
        .update_user_details(
            actor.id,
            trimmed(&body.name),
            trimmed(&body.email),
            trimmed(&body.phone),
        )
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    Ok(Json(serde_json::json!({"success": true, "user": user})))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PasswordBody {
    #[serde(default)]
    current_password: String,
    #[serde(default)]
    new_password: String,
}

/// PUT /api/auth/password
pub(super) async fn handler_update_password(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Json(body): Json<PasswordBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "newPassword must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let user = load_user(&state, actor.id).await?;
    if !verify(body.current_password, user.password_hash.clone()).await? {
        return Err(ApiError::Unauthorized("Password is incorrect".into()));
    }
    let new_hash = hash(body.new_password).await?;
    state.db.update_password_hash(actor.id, &new_hash).await?;
    let token = issue_token(&state, &user)?;
    Ok(Json(serde_json::json!({"success": true, "token": token})))
}

/// GET /api/auth/pending-employees
pub(super) async fn handler_pending_employees(
    State(state): State<Arc<AppState>>,
    RequireEmployee(_): RequireEmployee,
) -> Result<impl IntoResponse, ApiError> {
    let users = state.db.list_pending_employees().await?;
    Ok(Json(serde_json::json!({"success": true, "users": users})))
}

/// PUT /api/auth/approve-employee/{id}
pub(super) async fn handler_approve_employee(
    State(state): State<Arc<AppState>>,
    RequireEmployee(approver): RequireEmployee,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .approve_employee(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    info!(approved = %user.username, by = %approver.username, "employee approved");
    Ok(Json(serde_json::json!({
        "success": true,
        "message": format!("{} 승인 완료", user.name),
        "user": user,
    })))
}

/// DELETE /api/auth/reject-employee/{id}
pub(super) async fn handler_reject_employee(
    State(state): State<Arc<AppState>>,
    RequireEmployee(rejecter): RequireEmployee,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.db.reject_employee(id).await? {
        return Err(ApiError::NotFound("User not found".into()));
    }
    info!(user_id = %id, by = %rejecter.username, "employee registration rejected");
    Ok(Json(serde_json::json!({"success": true, "message": "거절 완료"})))
}
