use crate::{
    AppState,
    research::RunOptions,
    types::{AppError, ResearchRequest, ResearchResponse, Result, SessionStatus},
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

/// Run a research query to completion
#[utoipa::path(
    post,
    path = "/api/research",
    request_body = ResearchRequest,
    responses(
        (status = 200, description = "Research completed", body = ResearchResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Research cancelled"),
        (status = 502, description = "Model or tool upstream failed")
    ),
    tag = "research",
    security(("bearer" = []))
)]
pub async fn deep_research(
    State(state): State<AppState>,
    Json(payload): Json<ResearchRequest>,
) -> Result<Json<ResearchResponse>> {
    if payload.query.trim().is_empty() {
        return Err(AppError::InvalidInput("Query must not be empty".into()));
    }
    if payload.max_iterations == Some(0) {
        return Err(AppError::InvalidInput("max_iterations must be at least 1".into()));
    }
    if payload.max_concurrent_subagents == Some(0) {
        return Err(AppError::InvalidInput(
            "max_concurrent_subagents must be at least 1".into(),
        ));
    }

    let options = RunOptions {
        max_iterations: payload.max_iterations,
        max_concurrent_subagents: payload.max_concurrent_subagents,
        ..Default::default()
    };

    let report = state.workflow.run_research(&payload.query, options).await?;

    tracing::info!(
        query_id = %report.query_id,
        sources = report.sources.len(),
        tokens = report.metrics.total_tokens,
        "Research request served"
    );

    Ok(Json(ResearchResponse {
        report: report.best_text().to_string(),
        query_id: report.query_id,
        report_id: report.report_id,
        sources: report.sources,
        metrics: report.metrics,
    }))
}

/// List research runs in flight, plus runs that failed
#[utoipa::path(
    get,
    path = "/api/sessions",
    responses(
        (status = 200, description = "Tracked sessions", body = Vec<SessionStatus>),
        (status = 401, description = "Unauthorized")
    ),
    tag = "research",
    security(("bearer" = []))
)]
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionStatus>> {
    Json(state.workflow.list_sessions())
}

/// Current stage of a research run
#[utoipa::path(
    get,
    path = "/api/sessions/{id}",
    params(
        ("id" = String, Path, description = "Query ID")
    ),
    responses(
        (status = 200, description = "Session status", body = SessionStatus),
        (status = 404, description = "Session not found"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "research",
    security(("bearer" = []))
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatus>> {
    state
        .workflow
        .session_status(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Session {}", id)))
}

/// Cancel a research run; it stops before its next stage
#[utoipa::path(
    delete,
    path = "/api/sessions/{id}",
    params(
        ("id" = String, Path, description = "Query ID")
    ),
    responses(
        (status = 202, description = "Cancellation requested"),
        (status = 404, description = "No active session with this ID"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "research",
    security(("bearer" = []))
)]
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.workflow.cancel_research(&id)?;
    Ok(StatusCode::ACCEPTED)
}
