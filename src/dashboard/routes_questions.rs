//! Customer questions left from the site's question box.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::middleware_auth::{ClientIp, RequireEmployee};
use super::AppState;
use crate::error::ApiError;
use crate::wizard::normalize_phone;

pub const MAX_QUESTION_LEN: usize = 2000;

#[derive(Deserialize)]
pub(super) struct QuestionBody {
    #[serde(default)]
    phone: String,
    #[serde(default)]
    question: String,
}

/// POST /api/notifications/question
pub(super) async fn handler_create(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(body): Json<QuestionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mut problems = Vec::new();
    let phone = normalize_phone(&body.phone);
    if phone.is_none() {
        problems.push("phone must be a valid 010-XXXX-XXXX number".to_string());
    }
    let question = body.question.trim();
    if question.is_empty() {
        problems.push("question is required".to_string());
    } else if question.chars().count() > MAX_QUESTION_LEN {
        problems.push(format!(
            "question must be at most {} characters",
            MAX_QUESTION_LEN
        ));
    }
    let Some(phone) = phone.filter(|_| problems.is_empty()) else {
        return Err(ApiError::Validation(problems));
    };

    let row = state.db.insert_question(&phone, question, &ip).await?;
    state.prom_metrics.lead("question");
    info!(question_id = row.id, "question received");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({"success": true, "question": row})),
    ))
}

/// GET /api/notifications/questions
pub(super) async fn handler_list(
    State(state): State<Arc<AppState>>,
    RequireEmployee(_): RequireEmployee,
) -> Result<impl IntoResponse, ApiError> {
    let questions = state.db.list_questions().await?;
    Ok(Json(serde_json::json!({"success": true, "questions": questions})))
}

#[derive(Deserialize, Default)]
pub(super) struct ReadBody {
    read: Option<bool>,
}

/// PATCH /api/notifications/questions/{id}/read
///
/// Body is optional; without one the question is marked read.
pub(super) async fn handler_set_read(
    State(state): State<Arc<AppState>>,
    RequireEmployee(_): RequireEmployee,
    Path(id): Path<i64>,
    body: Option<Json<ReadBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let read = body.and_then(|Json(b)| b.read).unwrap_or(true);
    let row = state
        .db
        .set_question_read(id, read)
        .await?
        .ok_or_else(|| ApiError::NotFound("Question not found".into()))?;
    Ok(Json(serde_json::json!({"success": true, "question": row})))
}

/// DELETE /api/notifications/questions/{id}
pub(super) async fn handler_delete(
    State(state): State<Arc<AppState>>,
    RequireEmployee(actor): RequireEmployee,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.db.delete_question(id).await? {
        return Err(ApiError::NotFound("Question not found".into()));
    }
    info!(question_id = id, by = %actor.username, "question deleted");
    Ok(Json(serde_json::json!({"success": true})))
}
