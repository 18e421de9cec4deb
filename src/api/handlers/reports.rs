use crate::{
    AppState,
    types::{AppError, ReportSummary, Result, StoredReport},
};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use utoipa::IntoParams;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListReportsParams {
    /// Number of reports to return (default 20, max 100)
    pub limit: Option<usize>,
}

/// Most recent reports, newest first
#[utoipa::path(
    get,
    path = "/api/reports",
    params(ListReportsParams),
    responses(
        (status = 200, description = "Recent reports", body = Vec<ReportSummary>),
        (status = 401, description = "Unauthorized")
    ),
    tag = "reports",
    security(("bearer" = []))
)]
pub async fn list_reports(
    State(state): State<AppState>,
    Query(params): Query<ListReportsParams>,
) -> Result<Json<Vec<ReportSummary>>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Ok(Json(state.store.list_recent_reports(limit).await?))
}

/// Fetch a stored report
#[utoipa::path(
    get,
    path = "/api/reports/{id}",
    params(
        ("id" = String, Path, description = "Report ID")
    ),
    responses(
        (status = 200, description = "Stored report", body = StoredReport),
        (status = 404, description = "Report not found"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "reports",
    security(("bearer" = []))
)]
pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoredReport>> {
    state
        .store
        .get_research_report(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Report {}", id)))
}
