//! API request handlers.

/// Liveness check.
pub mod health;
/// Stored report handlers.
pub mod reports;
/// Research runs and session control.
pub mod research;

use crate::types::{
    CitationVerification, Finding, FindingOrigin, QueryAnalysis, QueryComplexity, QueryType,
    ReportSummary, ResearchMetrics, ResearchRequest, ResearchResponse, SessionStatus, Source,
    StoredReport,
};
use axum::Json;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(title = "deep-research", description = "Multi-agent research pipeline"),
    paths(
        health::health_check,
        research::deep_research,
        research::list_sessions,
        research::get_session,
        research::cancel_session,
        reports::list_reports,
        reports::get_report,
    ),
    components(schemas(
        ResearchRequest,
        ResearchResponse,
        ResearchMetrics,
        Source,
        Finding,
        FindingOrigin,
        QueryAnalysis,
        QueryType,
        QueryComplexity,
        CitationVerification,
        SessionStatus,
        ReportSummary,
        StoredReport,
        health::HealthResponse,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Service health"),
        (name = "research", description = "Research runs"),
        (name = "reports", description = "Stored reports"),
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// Serve the OpenAPI document
pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
