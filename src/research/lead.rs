//! Lead agent: query analysis, planning, completeness evaluation and synthesis

use crate::llm::{GenerationParams, LLMClient};
use crate::research::prompts;
use crate::types::{
    Evaluation, Finding, QueryAnalysis, QueryType, QueryComplexity, ResearchPlan, Result, Source,
    SubagentTask,
};
use crate::utils::json::parse_json;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

const COMPLETENESS_THRESHOLD: f64 = 0.8;

/// Synthesized report text and the sources it draws on
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub report: String,
    pub sources: Vec<Source>,
}

pub struct LeadAgent {
    client: Arc<dyn LLMClient>,
    max_tasks: usize,
    synthesis_source_limit: usize,
    tokens_used: AtomicU64,
}

impl LeadAgent {
    pub fn new(client: Arc<dyn LLMClient>, max_tasks: usize, synthesis_source_limit: usize) -> Self {
        Self {
            client,
            max_tasks: max_tasks.max(1),
            synthesis_source_limit,
            tokens_used: AtomicU64::new(0),
        }
    }

    pub fn tokens_used(&self) -> u64 {
        self.tokens_used.load(Ordering::Relaxed)
    }

    async fn call(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<String> {
        let response = self
            .client
            .generate_with_params(prompt, &GenerationParams::new(temperature, max_tokens))
            .await?;
        self.tokens_used
            .fetch_add(response.usage.total(), Ordering::Relaxed);
        Ok(response.content)
    }

    /// Classify the query. Unusable replies fall back to straightforward/simple.
    pub async fn analyze_query(&self, query: &str) -> Result<QueryAnalysis> {
        info!("Analyzing query");
        let response = self.call(&prompts::analyze_query(query), 0.3, 4000).await?;

        let analysis = match parse_json::<Value>(&response) {
            Some(value) => QueryAnalysis {
                query_type: value
                    .get("query_type")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<QueryType>().ok())
                    .unwrap_or_default(),
                complexity: value
                    .get("complexity")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<QueryComplexity>().ok())
                    .unwrap_or_default(),
                reasoning: value
                    .get("reasoning")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            None => {
                warn!("Failed to parse query analysis, using defaults");
                QueryAnalysis {
                    reasoning: "Failed to parse analysis".to_string(),
                    ..Default::default()
                }
            }
        };

        info!(
            query_type = %analysis.query_type,
            complexity = %analysis.complexity,
            "Query analyzed"
        );
        Ok(analysis)
    }

    /// Break the query into subagent tasks
    pub async fn create_plan(&self, query: &str, analysis: &QueryAnalysis) -> Result<ResearchPlan> {
        let suggested = analysis.complexity.subagent_count();
        info!(
            "Creating research plan for {} {} query ({} subagents suggested)",
            analysis.complexity, analysis.query_type, suggested
        );

        let response = self
            .call(&prompts::create_plan(query, analysis, suggested), 0.5, 4000)
            .await?;

        let parsed = parse_json::<Value>(&response);
        if parsed.is_none() {
            warn!("Failed to parse research plan, using a single-task plan");
        }

        let mut tasks = parsed
            .as_ref()
            .and_then(|v| v.get("tasks"))
            .map(parse_tasks)
            .unwrap_or_default();

        if tasks.is_empty() {
            tasks.push(fallback_task(query));
        }
        if tasks.len() > self.max_tasks {
            warn!(
                "Plan has {} tasks, keeping the first {}",
                tasks.len(),
                self.max_tasks
            );
            tasks.truncate(self.max_tasks);
        }

        let synthesis_approach = parsed
            .as_ref()
            .and_then(|v| v.get("synthesis_approach"))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("Combine all findings")
            .to_string();

        let plan = ResearchPlan {
            subagent_count: tasks.len(),
            tasks,
            synthesis_approach,
        };
        info!("Created plan with {} tasks", plan.subagent_count);
        Ok(plan)
    }

    /// Decide whether the findings answer the query or another round is needed
    pub async fn evaluate_completeness(
        &self,
        query: &str,
        findings: &[Finding],
        iteration: u32,
    ) -> Result<Evaluation> {
        info!("Evaluating completeness (iteration {})", iteration);

        let response = self
            .call(
                &prompts::evaluate_completeness(query, findings, iteration),
                0.3,
                4000,
            )
            .await?;

        let evaluation = match parse_json::<Value>(&response) {
            Some(value) => parse_evaluation(&value),
            None => {
                warn!("Failed to parse evaluation, deciding by iteration count");
                Evaluation {
                    is_complete: iteration >= 2,
                    needs_more: iteration < 2,
                    completeness_score: 0.5,
                    missing_aspects: Vec::new(),
                    additional_tasks: Vec::new(),
                }
            }
        };

        info!(
            "Completeness: {:.2}, needs more: {}",
            evaluation.completeness_score, evaluation.needs_more
        );
        Ok(evaluation)
    }

    /// Write the report from the collected findings
    pub async fn synthesize(
        &self,
        query: &str,
        findings: &[Finding],
        plan: &ResearchPlan,
    ) -> Result<Synthesis> {
        info!("Synthesizing {} findings", findings.len());

        let formatted = prompts::format_findings_for_synthesis(findings, self.synthesis_source_limit);
        let response = self
            .call(
                &prompts::synthesize(query, &plan.synthesis_approach, &formatted),
                0.5,
                8000,
            )
            .await?;

        let (report, mut sources) = split_report_and_sources(&response);
        if sources.is_empty() {
            sources = sources_from_findings(findings);
        }

        info!(
            "Synthesized report: {} chars, {} sources",
            report.len(),
            sources.len()
        );
        Ok(Synthesis { report, sources })
    }
}

fn fallback_task(query: &str) -> SubagentTask {
    SubagentTask {
        description: format!("Research: {}", query),
        search_queries: vec![query.to_string()],
        expected_output: "Comprehensive information".to_string(),
        tools: vec!["web_search".to_string(), "web_fetch".to_string()],
    }
}

/// Tasks without a usable description are dropped
fn parse_tasks(value: &Value) -> Vec<SubagentTask> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value::<SubagentTask>(item.clone()).ok())
                .filter(|task| !task.description.trim().is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_evaluation(value: &Value) -> Evaluation {
    let completeness_score = value
        .get("completeness_score")
        .and_then(Value::as_f64)
        .unwrap_or(0.5);
    let needs_more = value
        .get("needs_more")
        .and_then(Value::as_bool)
        .unwrap_or(completeness_score < COMPLETENESS_THRESHOLD);
    let is_complete = value
        .get("is_complete")
        .and_then(Value::as_bool)
        .unwrap_or(!needs_more);
    let missing_aspects = value
        .get("missing_aspects")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let additional_tasks = value
        .get("additional_tasks")
        .map(parse_tasks)
        .unwrap_or_default();

    Evaluation {
        is_complete,
        needs_more,
        completeness_score,
        missing_aspects,
        additional_tasks,
    }
}

/// Split a synthesis reply into the report body and a trailing JSON source list.
///
/// Only a list that runs to the end of the reply counts (optionally inside a
/// code fence). Candidates are tried from the end, so fenced snippets in the
/// report body are left alone.
pub fn split_report_and_sources(response: &str) -> (String, Vec<Source>) {
    let lines: Vec<&str> = response.lines().collect();

    for idx in (0..lines.len()).rev() {
        let trimmed = lines[idx].trim_start();
        if !(trimmed.starts_with('[') || trimmed.starts_with('{')) {
            continue;
        }

        let Some(sources) = trailing_json(&lines[idx..].join("\n")).and_then(parse_sources) else {
            continue;
        };

        // Drop the fence opener that wraps the list
        let start = match idx.checked_sub(1) {
            Some(prev) if lines[prev].trim_start().starts_with("```") => prev,
            _ => idx,
        };
        let report = lines[..start].join("\n").trim().to_string();
        return (report, sources);
    }

    (response.trim().to_string(), Vec::new())
}

/// The tail itself as JSON text, allowing only a closing fence after it
fn trailing_json(tail: &str) -> Option<&str> {
    let tail = tail.trim();
    let tail = tail.strip_suffix("```").map_or(tail, str::trim_end);
    serde_json::from_str::<Value>(tail).ok().map(|_| tail)
}

fn parse_sources(raw: &str) -> Option<Vec<Source>> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let items = match &value {
        Value::Array(items) => items.clone(),
        Value::Object(map) => match map.get("sources") {
            Some(Value::Array(items)) => items.clone(),
            _ => vec![value.clone()],
        },
        _ => return None,
    };

    let sources: Vec<Source> = items
        .iter()
        .filter_map(|item| match item {
            Value::String(url) => Some(Source {
                title: url.clone(),
                url: url.clone(),
            }),
            Value::Object(map) => {
                let url = map
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let title = map
                    .get("title")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| url.clone());
                (!title.is_empty() || !url.is_empty()).then_some(Source { title, url })
            }
            _ => None,
        })
        .collect();

    (!sources.is_empty()).then_some(sources)
}

/// One source per distinct finding URL, in first-seen order
pub fn sources_from_findings(findings: &[Finding]) -> Vec<Source> {
    let mut seen = HashSet::new();
    findings
        .iter()
        .filter(|f| !f.url.is_empty() && seen.insert(f.url.clone()))
        .map(|f| Source {
            title: if f.title.is_empty() {
                f.url.clone()
            } else {
                f.title.clone()
            },
            url: f.url.clone(),
        })
        .collect()
}
