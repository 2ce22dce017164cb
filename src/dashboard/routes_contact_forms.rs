//! Contact form API. Customers submit and read their own forms; employees
//! work the queue.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;
use tracing::info;

use super::middleware_auth::{RequireAuth, RequireEmployee};
use super::AppState;
use crate::db::{group_history, ContactFormRow, RecordKind};
use crate::error::ApiError;
use crate::records::{self, ContactForm, ContactFormInput, ContactFormUpdate, RecordFilter};

async fn with_history(state: &AppState, row: ContactFormRow) -> Result<ContactForm, ApiError> {
    let history = state
        .db
        .get_edit_history(RecordKind::ContactForm, &[row.id])
        .await?;
    Ok(ContactForm::from_rows(row, history))
}

async fn load(state: &AppState, id: i64) -> Result<ContactFormRow, ApiError> {
    state
        .db
        .get_contact_form(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Contact form not found".into()))
}

/// GET /api/contact-forms?status=
pub(super) async fn handler_list(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Query(filter): Query<RecordFilter>,
) -> Result<impl IntoResponse, ApiError> {
    records::validate_contact_filter(&filter)?;
    let owner = (!actor.is_employee()).then_some(actor.id);
    let rows = state
        .db
        .list_contact_forms(owner, filter.status.as_deref())
        .await?;
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut history = group_history(
        state
            .db
            .get_edit_history(RecordKind::ContactForm, &ids)
            .await?,
    );
    let forms: Vec<ContactForm> = rows
        .into_iter()
        .map(|row| {
            let h = history.remove(&row.id).unwrap_or_default();
            ContactForm::from_rows(row, h)
        })
        .collect();
    Ok(Json(serde_json::json!({"success": true, "contactForms": forms})))
}

/// POST /api/contact-forms
pub(super) async fn handler_create(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Json(input): Json<ContactFormInput>,
) -> Result<impl IntoResponse, ApiError> {
    if actor.is_employee() {
        return Err(ApiError::Forbidden(
            "Only customers can submit contact forms".into(),
        ));
    }
    let new = records::validate_contact_form(&input)?;
    let row = state.db.insert_contact_form(actor.id, &new).await?;
    info!(form_id = row.id, customer = %actor.username, "contact form submitted");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "contactForm": ContactForm::from_rows(row, Vec::new()),
        })),
    ))
}

/// GET /api/contact-forms/{id}
pub(super) async fn handler_get(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let row = load(&state, id).await?;
    if !records::can_view(&actor, row.customer_id) {
        return Err(ApiError::Forbidden("Not authorized to view this form".into()));
    }
    let form = with_history(&state, row).await?;
    Ok(Json(serde_json::json!({"success": true, "contactForm": form})))
}

/// PUT /api/contact-forms/{id}
pub(super) async fn handler_update(
    State(state): State<Arc<AppState>>,
    RequireEmployee(actor): RequireEmployee,
    Path(id): Path<i64>,
    Json(update): Json<ContactFormUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let current = load(&state, id).await?;
    let changes = records::plan_contact_form_update(&actor, &current, &update)?;
    let row = state
        .db
        .update_contact_form(id, update.version, &changes)
        .await?
        .into_result("Contact form")?;
    info!(form_id = id, by = %actor.username, version = row.version, "contact form updated");
    let form = with_history(&state, row).await?;
    Ok(Json(serde_json::json!({"success": true, "contactForm": form})))
}

/// DELETE /api/contact-forms/{id}
pub(super) async fn handler_delete(
    State(state): State<Arc<AppState>>,
    RequireEmployee(actor): RequireEmployee,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.db.delete_contact_form(id).await? {
        return Err(ApiError::NotFound("Contact form not found".into()));
    }
    info!(form_id = id, by = %actor.username, "contact form deleted");
    Ok(Json(serde_json::json!({"success": true})))
}
