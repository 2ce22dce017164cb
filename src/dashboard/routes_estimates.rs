//! Price estimate API: wizard submissions, employee follow-up, and the
//! read-only catalog and calendar the wizard renders from.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::middleware_auth::{ClientIp, RequireEmployee};
use super::AppState;
use crate::error::ApiError;
use crate::notify::Notification;
use crate::outbox::Job;
use crate::records::{
    self, EstimateAnnotationInput, EstimateStatus, EstimateStatusUpdate, PriceEstimate,
};
use crate::wizard::{self, EstimateKind, Submission};
use crate::{calendar, ledger, pricing};

/// Store a validated submission with its sheet mirror and email jobs.
async fn accept_submission(
    state: &AppState,
    sub: Submission,
    ip: String,
) -> Result<impl IntoResponse, ApiError> {
    let submitted_at = chrono::Utc::now();
    let jobs = [
        Job::MirrorEstimate {
            kind: sub.kind,
            ip: ip.clone(),
            submitted_at,
            submission: sub.clone(),
        },
        Job::notify(Notification::new_estimate(&sub, submitted_at)),
    ];
    let row = state
        .db
        .insert_estimate(&sub, &ip, submitted_at, &jobs)
        .await?;
    state.prom_metrics.lead(sub.kind.as_str());
    info!(
        estimate_id = row.id,
        kind = sub.kind.as_str(),
        converted = sub.converted,
        price = ?sub.price,
        "estimate received"
    );
    let message = match sub.kind {
        EstimateKind::Full => "상담 신청이 완료되었습니다",
        EstimateKind::Quick => "견적이 저장되었습니다",
    };
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "message": message,
            "estimateId": row.id,
        })),
    ))
}

/// POST /api/price-estimate
pub(super) async fn handler_submit_full(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(sub): Json<Submission>,
) -> Result<impl IntoResponse, ApiError> {
    let sub = wizard::validate_full(sub, calendar::today_kst())?;
    accept_submission(&state, sub, ip).await
}

/// POST /api/price-estimate/quick
pub(super) async fn handler_submit_quick(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(sub): Json<Submission>,
) -> Result<impl IntoResponse, ApiError> {
    let sub = wizard::validate_quick(sub, calendar::today_kst())?;
    accept_submission(&state, sub, ip).await
}

#[derive(Debug, Deserialize)]
pub(super) struct ListQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
    status: Option<String>,
}

/// GET /api/price-estimate?type=&status=
pub(super) async fn handler_list(
    State(state): State<Arc<AppState>>,
    RequireEmployee(_): RequireEmployee,
    Query(q): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let mut problems = Vec::new();
    let kind = q.kind.as_deref().filter(|k| !k.is_empty());
    if let Some(k) = kind {
        if EstimateKind::parse(k).is_none() {
            problems.push("type must be quick or full".to_string());
        }
    }
    let status = q.status.as_deref().filter(|s| !s.is_empty());
    if let Some(s) = status {
        if EstimateStatus::parse(s).is_none() {
            problems.push(format!(
                "status must be one of: {}",
                EstimateStatus::VALUES.join(", ")
            ));
        }
    }
    if !problems.is_empty() {
        return Err(ApiError::Validation(problems));
    }
    let estimates: Vec<PriceEstimate> = state
        .db
        .list_estimates(kind, status)
        .await?
        .into_iter()
        .map(PriceEstimate::from)
        .collect();
    Ok(Json(serde_json::json!({
        "success": true,
        "estimates": estimates,
    })))
}

/// GET /api/price-estimate/{id}
pub(super) async fn handler_get(
    State(state): State<Arc<AppState>>,
    RequireEmployee(_): RequireEmployee,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let row = state
        .db
        .get_estimate(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Estimate not found".into()))?;
    Ok(Json(serde_json::json!({
        "success": true,
        "estimate": PriceEstimate::from(row),
    })))
}

/// PATCH /api/price-estimate/{id}/status
pub(super) async fn handler_update_status(
    State(state): State<Arc<AppState>>,
    RequireEmployee(actor): RequireEmployee,
    Path(id): Path<i64>,
    Json(body): Json<EstimateStatusUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let status = records::parse_estimate_status(&body.status)?;
    let row = state
        .db
        .update_estimate_status(id, body.version, status)
        .await?
        .into_result("Estimate")?;
    info!(
        estimate_id = id,
        status = status.as_str(),
        by = %actor.username,
        "estimate status changed"
    );
    Ok(Json(serde_json::json!({
        "success": true,
        "estimate": PriceEstimate::from(row),
    })))
}

/// PATCH /api/price-estimate/{id}
///
/// Memo, status, contact and appointment corrections in one call.
pub(super) async fn handler_annotate(
    State(state): State<Arc<AppState>>,
    RequireEmployee(actor): RequireEmployee,
    Path(id): Path<i64>,
    Json(body): Json<EstimateAnnotationInput>,
) -> Result<impl IntoResponse, ApiError> {
    let version = body.version;
    let changes = records::plan_estimate_annotation(body)?;
    if changes.is_empty() {
        return Err(ApiError::validation("nothing to update"));
    }
    let row = state
        .db
        .annotate_estimate(id, version, &changes)
        .await?
        .into_result("Estimate")?;
    info!(estimate_id = id, by = %actor.username, "estimate annotated");
    Ok(Json(serde_json::json!({
        "success": true,
        "estimate": PriceEstimate::from(row),
    })))
}

/// GET /api/price-estimate/sheets
///
/// What the shared spreadsheet currently holds, parsed per tab.
pub(super) async fn handler_sheets(
    State(state): State<Arc<AppState>>,
    RequireEmployee(_): RequireEmployee,
) -> Result<impl IntoResponse, ApiError> {
    let sheets = ledger::read_sheet_estimates(state.ledger.as_ref()).await?;
    let mut body = serde_json::to_value(&sheets).map_err(anyhow::Error::from)?;
    if let Some(obj) = body.as_object_mut() {
        obj.insert("success".into(), serde_json::Value::Bool(true));
    }
    Ok(Json(body))
}

/// GET /api/price-estimate/pricing
pub(super) async fn handler_pricing() -> impl IntoResponse {
    Json(pricing::catalog())
}

#[derive(Debug, Deserialize)]
pub(super) struct CalendarQuery {
    year: Option<i32>,
    month: Option<u32>,
}

/// GET /api/price-estimate/calendar?year=&month=
///
/// Defaults to the current KST month.
pub(super) async fn handler_calendar(
    Query(q): Query<CalendarQuery>,
) -> Result<impl IntoResponse, ApiError> {
    use chrono::Datelike;
    let today = calendar::today_kst();
    let year = q.year.unwrap_or(today.year());
    let month = q.month.unwrap_or(today.month());
    let grid = calendar::month_grid(year, month, today)
        .ok_or_else(|| ApiError::validation("month must be between 1 and 12"))?;
    Ok(Json(grid))
}
