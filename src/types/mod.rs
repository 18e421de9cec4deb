use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

// ============= API Request/Response Types =============

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResearchRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_subagents: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResearchResponse {
    pub query_id: String,
    pub report_id: Option<String>,
    pub report: String,
    pub sources: Vec<Source>,
    pub metrics: ResearchMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportSummary {
    pub id: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
}

/// A report as persisted by the store
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredReport {
    pub id: String,
    pub plan_id: String,
    pub query: String,
    pub report: String,
    pub cited_report: String,
    pub sources: Vec<Source>,
    pub metrics: ResearchMetrics,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionStatus {
    pub query_id: String,
    pub query: String,
    pub stage: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============= Query Analysis =============

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum QueryType {
    /// Multiple perspectives on the same issue
    DepthFirst,
    /// Distinct, independent sub-questions
    BreadthFirst,
    #[default]
    Straightforward,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::DepthFirst => "depth-first",
            QueryType::BreadthFirst => "breadth-first",
            QueryType::Straightforward => "straightforward",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "depth-first" => Ok(QueryType::DepthFirst),
            "breadth-first" => Ok(QueryType::BreadthFirst),
            "straightforward" => Ok(QueryType::Straightforward),
            other => Err(AppError::InvalidInput(format!("Unknown query type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum QueryComplexity {
    #[default]
    Simple,
    Standard,
    Medium,
    High,
}

impl QueryComplexity {
    /// Number of subagents the planner asks for at this complexity
    pub fn subagent_count(&self) -> usize {
        match self {
            QueryComplexity::Simple => 1,
            QueryComplexity::Standard => 3,
            QueryComplexity::Medium => 5,
            QueryComplexity::High => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryComplexity::Simple => "simple",
            QueryComplexity::Standard => "standard",
            QueryComplexity::Medium => "medium",
            QueryComplexity::High => "high",
        }
    }
}

impl fmt::Display for QueryComplexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryComplexity {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Ok(QueryComplexity::Simple),
            "standard" => Ok(QueryComplexity::Standard),
            "medium" => Ok(QueryComplexity::Medium),
            "high" => Ok(QueryComplexity::High),
            other => Err(AppError::InvalidInput(format!(
                "Unknown query complexity: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QueryAnalysis {
    pub query_type: QueryType,
    pub complexity: QueryComplexity,
    #[serde(default)]
    pub reasoning: String,
}

// ============= Planning =============

/// Tools a subagent gets when its task doesn't name any
pub const DEFAULT_SUBAGENT_TOOLS: &[&str] = &["web_search", "web_fetch", "memory_store"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SubagentTask {
    pub description: String,
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub expected_output: String,
    #[serde(default)]
    pub tools: Vec<String>,
}

impl SubagentTask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    /// Tool names this task may use, falling back to the subagent defaults
    pub fn effective_tools(&self) -> Vec<String> {
        if self.tools.is_empty() {
            DEFAULT_SUBAGENT_TOOLS.iter().map(|t| t.to_string()).collect()
        } else {
            self.tools.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResearchPlan {
    pub subagent_count: usize,
    pub tasks: Vec<SubagentTask>,
    #[serde(default)]
    pub synthesis_approach: String,
}

// ============= Findings & Results =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FindingOrigin {
    WebSearch,
    WebFetch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Finding {
    pub title: String,
    pub content: String,
    pub url: String,
    pub origin: FindingOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Source {
    pub title: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SubagentResult {
    pub agent_id: String,
    pub task: String,
    pub success: bool,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tool_calls: usize,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubagentResult {
    /// A result for a worker that never produced output
    pub fn failed(agent_id: &str, task: &str, error: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            task: task.to_string(),
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Evaluation {
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub needs_more: bool,
    #[serde(default = "default_completeness_score")]
    pub completeness_score: f64,
    #[serde(default)]
    pub missing_aspects: Vec<String>,
    #[serde(default)]
    pub additional_tasks: Vec<SubagentTask>,
}

fn default_completeness_score() -> f64 {
    0.5
}

// ============= Reports =============

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CitationVerification {
    pub total_citations: usize,
    pub unique_citations: usize,
    pub total_sources: usize,
    pub uncited_sources: Vec<usize>,
    pub citation_density: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResearchMetrics {
    pub total_tokens: u64,
    pub execution_time_secs: f64,
    pub iterations: u32,
    pub subagents_completed: usize,
    pub subagents_failed: usize,
    pub sources: usize,
}

/// Final output of a research run
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResearchReport {
    pub query_id: String,
    pub report_id: Option<String>,
    pub query: String,
    pub analysis: QueryAnalysis,
    pub synthesized_text: String,
    pub cited_text: String,
    pub sources: Vec<Source>,
    pub metrics: ResearchMetrics,
    pub verification: CitationVerification,
}

impl ResearchReport {
    /// The cited text when present, otherwise the plain synthesis
    pub fn best_text(&self) -> &str {
        if self.cited_text.trim().is_empty() {
            &self.synthesized_text
        } else {
            &self.cited_text
        }
    }
}

// ============= Tool Types =============

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM error: {0}")]
    LLM(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Research cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the failed operation may succeed if attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::RateLimited(_) | AppError::Upstream(_))
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream(_) | AppError::LLM(_) | AppError::Tool(_) => StatusCode::BAD_GATEWAY,
            AppError::Cancelled(_) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
