//! Service request API. Customers file and edit their own requests;
//! employees triage all of them.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;
use tracing::info;

use super::middleware_auth::{RequireAuth, RequireEmployee};
use super::AppState;
use crate::db::{group_history, RecordKind, ServiceRequestRow};
use crate::error::ApiError;
use crate::records::{
    self, RecordFilter, ServiceRequest, ServiceRequestInput, ServiceRequestUpdate,
};

async fn with_history(
    state: &AppState,
    row: ServiceRequestRow,
) -> Result<ServiceRequest, ApiError> {
    let history = state
        .db
        .get_edit_history(RecordKind::ServiceRequest, &[row.id])
        .await?;
    Ok(ServiceRequest::from_rows(row, history))
}

async fn load(state: &AppState, id: i64) -> Result<ServiceRequestRow, ApiError> {
    state
        .db
        .get_service_request(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Service request not found".into()))
}

/// GET /api/service-requests?status=&category=&priority=
pub(super) async fn handler_list(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Query(filter): Query<RecordFilter>,
) -> Result<impl IntoResponse, ApiError> {
    records::validate_service_filter(&filter)?;
    let owner = (!actor.is_employee()).then_some(actor.id);
    let rows = state.db.list_service_requests(owner, &filter).await?;
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut history = group_history(
        state
            .db
            .get_edit_history(RecordKind::ServiceRequest, &ids)
            .await?,
    );
    let requests: Vec<ServiceRequest> = rows
        .into_iter()
        .map(|row| {
            let h = history.remove(&row.id).unwrap_or_default();
            ServiceRequest::from_rows(row, h)
        })
        .collect();
    Ok(Json(serde_json::json!({
        "success": true,
        "serviceRequests": requests,
    })))
}

/// POST /api/service-requests
pub(super) async fn handler_create(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Json(input): Json<ServiceRequestInput>,
) -> Result<impl IntoResponse, ApiError> {
    if actor.is_employee() {
        return Err(ApiError::Forbidden(
            "Only customers can file service requests".into(),
        ));
    }
    let new = records::validate_service_request(&input)?;
    let row = state.db.insert_service_request(actor.id, &new).await?;
    info!(request_id = row.id, customer = %actor.username, "service request filed");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "serviceRequest": ServiceRequest::from_rows(row, Vec::new()),
        })),
    ))
}

/// GET /api/service-requests/{id}
pub(super) async fn handler_get(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let row = load(&state, id).await?;
    if !records::can_view(&actor, row.customer_id) {
        return Err(ApiError::Forbidden(
            "Not authorized to view this request".into(),
        ));
    }
    let request = with_history(&state, row).await?;
    Ok(Json(serde_json::json!({"success": true, "serviceRequest": request})))
}

/// PUT /api/service-requests/{id}
///
/// Employees move status and priority (with an optional note for the
/// audit trail); the owning customer edits the description fields.
pub(super) async fn handler_update(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Path(id): Path<i64>,
    Json(update): Json<ServiceRequestUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let current = load(&state, id).await?;
    let changes = records::plan_service_request_update(&actor, &current, &update)?;
    let row = state
        .db
        .update_service_request(id, update.version, &changes)
        .await?
        .into_result("Service request")?;
    info!(request_id = id, by = %actor.username, version = row.version, "service request updated");
    let request = with_history(&state, row).await?;
    Ok(Json(serde_json::json!({"success": true, "serviceRequest": request})))
}

/// DELETE /api/service-requests/{id}
pub(super) async fn handler_delete(
    State(state): State<Arc<AppState>>,
    RequireEmployee(actor): RequireEmployee,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.db.delete_service_request(id).await? {
        return Err(ApiError::NotFound("Service request not found".into()));
    }
    info!(request_id = id, by = %actor.username, "service request deleted");
    Ok(Json(serde_json::json!({"success": true})))
}
