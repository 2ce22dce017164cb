//! Live chat API.
//!
//! Customers are anonymous and identified by the session id their client
//! generates. Employees see every chat and are the only ones who can
//! accept or end one, or speak as `employee`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::middleware_auth::{MaybeAuth, RequireEmployee};
use super::AppState;
use crate::chat::{self, Chat, ChatMessage, Sender};
use crate::db::ChatWithMessages;
use crate::error::ApiError;

fn view((row, messages): ChatWithMessages) -> Chat {
    Chat::from_rows(row, messages)
}

async fn load_chat(state: &AppState, session_id: &str) -> Result<Chat, ApiError> {
    state
        .db
        .get_chat(session_id)
        .await?
        .map(view)
        .ok_or_else(|| ApiError::NotFound("Chat not found".into()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChatRequestBody {
    #[serde(default)]
    session_id: String,
    customer_name: Option<String>,
}

/// POST /api/notifications/chat
///
/// Idempotent per session: a second request returns the existing chat
/// untouched and queues no notification.
pub(super) async fn handler_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    chat::validate_session_id(&body.session_id)?;
    let name = chat::customer_name_or_default(body.customer_name.as_deref());
    let (chat, created) = state
        .db
        .create_chat_if_absent(&body.session_id, &name)
        .await?;
    let status = if created {
        state.prom_metrics.chats_requested.inc();
        state.prom_metrics.lead("chat");
        info!(session_id = %body.session_id, customer = %name, "chat requested");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(serde_json::json!({"success": true, "chat": view(chat)})),
    ))
}

/// GET /api/notifications/chats
pub(super) async fn handler_list(
    State(state): State<Arc<AppState>>,
    RequireEmployee(_): RequireEmployee,
) -> Result<impl IntoResponse, ApiError> {
    let chats: Vec<Chat> = state.db.list_chats().await?.into_iter().map(view).collect();
    Ok(Json(serde_json::json!({"success": true, "chats": chats})))
}

/// GET /api/notifications/chat/{session_id}
pub(super) async fn handler_get(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = state.db.get_chat(&session_id).await?.map(view);
    Ok(Json(serde_json::json!({"success": true, "chat": chat})))
}

/// PATCH /api/notifications/chat/{session_id}/accept
pub(super) async fn handler_accept(
    State(state): State<Arc<AppState>>,
    RequireEmployee(actor): RequireEmployee,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = state
        .db
        .accept_chat(&session_id, &actor.name)
        .await?
        .into_result("Chat")?;
    info!(session_id = %session_id, employee = %actor.username, "chat accepted");
    Ok(Json(serde_json::json!({"success": true, "chat": view(chat)})))
}

/// PATCH /api/notifications/chat/{session_id}/end
pub(super) async fn handler_end(
    State(state): State<Arc<AppState>>,
    RequireEmployee(actor): RequireEmployee,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = state
        .db
        .end_chat(&session_id, &actor.name)
        .await?
        .into_result("Chat")?;
    info!(session_id = %session_id, employee = %actor.username, "chat ended");
    Ok(Json(serde_json::json!({"success": true, "chat": view(chat)})))
}

/// DELETE /api/notifications/chat/{session_id}
///
/// Customer gave up waiting. Only a pending chat can go.
pub(super) async fn handler_cancel(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .delete_pending_chat(&session_id)
        .await?
        .into_result("Chat")?;
    info!(session_id = %session_id, "chat cancelled");
    Ok(Json(serde_json::json!({"success": true})))
}

#[derive(Deserialize)]
pub(super) struct ReadBody {
    sender: Sender,
}

/// PATCH /api/notifications/chat/{session_id}/read
///
/// `sender` names whose messages were read: the customer's view marks
/// `employee` messages, the dashboard marks `user` messages.
pub(super) async fn handler_mark_read(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(body): Json<ReadBody>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .mark_read(&session_id, body.sender)
        .await?
        .ok_or_else(|| ApiError::NotFound("Chat not found".into()))?;
    let chat = load_chat(&state, &session_id).await?;
    Ok(Json(serde_json::json!({"success": true, "chat": chat})))
}

#[derive(Deserialize)]
pub(super) struct MessageBody {
    #[serde(default)]
    text: String,
    #[serde(default = "default_sender")]
    sender: Sender,
}

fn default_sender() -> Sender {
    Sender::User
}

/// POST /api/notifications/chat/{session_id}/message
pub(super) async fn handler_send_message(
    State(state): State<Arc<AppState>>,
    MaybeAuth(actor): MaybeAuth,
    Path(session_id): Path<String>,
    Json(body): Json<MessageBody>,
) -> Result<impl IntoResponse, ApiError> {
    let employee_name = match (body.sender, &actor) {
        (Sender::User, _) => String::new(),
        (Sender::Employee, Some(a)) if a.is_employee() => a.name.clone(),
        (Sender::Employee, Some(_)) => {
            return Err(ApiError::Forbidden("Employee access required".into()))
        }
        (Sender::Employee, None) => {
            return Err(ApiError::Unauthorized("Authentication required".into()))
        }
    };
    let text = chat::validate_message_text(&body.text)?;
    let message = state
        .db
        .append_message(&session_id, &text, body.sender, &employee_name)
        .await?
        .into_result("Chat")?;
    let chat = load_chat(&state, &session_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "chat": chat,
            "message": ChatMessage::from(message),
        })),
    ))
}
