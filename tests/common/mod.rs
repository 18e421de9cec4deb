//! Shared test doubles.
//!
//! `ScriptedLLM` answers each prompt by the role it was written for, keyed on
//! the prompt's opening words. Queued responses are used in order and the
//! last one repeats.

#![allow(dead_code)]

use async_trait::async_trait;
use deep_research::llm::{GenerationParams, LLMClient, LLMResponse, TokenUsage};
use deep_research::tools::{Tool, ToolRegistry};
use deep_research::types::{AppError, Result};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const ANALYZE: &str = "Analyze this research query";
pub const PLAN: &str = "Create a detailed research plan";
pub const EVALUATE: &str = "Evaluate whether the research results";
pub const SYNTHESIZE: &str = "Synthesize the research results";
pub const CITE: &str = "Add citations to this research report";
pub const SUBAGENT_PLAN: &str = "Plan how to research this task";
pub const SUBAGENT_SUMMARY: &str = "Summarize these research findings";

/// Tokens reported for every scripted call
pub const TOKENS_PER_CALL: u64 = 15;

#[derive(Default)]
pub struct ScriptedLLM {
    scripts: Mutex<HashMap<&'static str, VecDeque<Result<String>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedLLM {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for prompts starting with `prefix`
    pub fn on(self, prefix: &'static str, response: impl Into<String>) -> Self {
        self.scripts
            .lock()
            .entry(prefix)
            .or_default()
            .push_back(Ok(response.into()));
        self
    }

    /// Queue a failure for prompts starting with `prefix`
    pub fn fail_on(self, prefix: &'static str, error: AppError) -> Self {
        self.scripts
            .lock()
            .entry(prefix)
            .or_default()
            .push_back(Err(error));
        self
    }

    /// A complete happy-path script: one task, one iteration
    pub fn happy_path() -> Self {
        Self::new()
            .on(ANALYZE, analysis_json("straightforward", "simple"))
            .on(PLAN, plan_json(&["Find the Rust 1.0 release date"]))
            .on(SUBAGENT_PLAN, "Search the release notes.")
            .on(SUBAGENT_SUMMARY, "Rust 1.0 shipped in May 2015.")
            .on(EVALUATE, evaluation_json(false, 0.9, &[]))
            .on(
                SYNTHESIZE,
                "# Rust 1.0\n\nRust 1.0 was released on May 15, 2015.",
            )
            .on(
                CITE,
                "<synthesized_text>\n# Rust 1.0\n\nRust 1.0 was released on May 15, 2015 [1].\n</synthesized_text>",
            )
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of calls whose prompt starts with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|p| p.starts_with(prefix))
            .count()
    }

    fn reply(&self, prompt: &str) -> Result<String> {
        let mut scripts = self.scripts.lock();
        let Some((_, queue)) = scripts
            .iter_mut()
            .find(|(prefix, _)| prompt.starts_with(**prefix))
        else {
            return Err(AppError::LLM(format!(
                "no scripted reply for: {}",
                prompt.lines().next().unwrap_or_default()
            )));
        };

        match queue.len() {
            0 => Err(AppError::LLM("script exhausted".to_string())),
            1 => match &queue[0] {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(AppError::LLM(e.to_string())),
            },
            _ => queue.pop_front().unwrap_or_else(|| Ok(String::new())),
        }
    }
}

#[async_trait]
impl LLMClient for ScriptedLLM {
    async fn generate_with_params(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<LLMResponse> {
        self.calls.lock().push(prompt.to_string());
        let content = self.reply(prompt)?;
        Ok(LLMResponse {
            content,
            finish_reason: "end_turn".to_string(),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub fn analysis_json(query_type: &str, complexity: &str) -> String {
    json!({
        "query_type": query_type,
        "complexity": complexity,
        "reasoning": "scripted"
    })
    .to_string()
}

pub fn plan_json(descriptions: &[&str]) -> String {
    let tasks: Vec<Value> = descriptions
        .iter()
        .map(|d| {
            json!({
                "description": d,
                "search_queries": [d],
                "expected_output": "facts",
                "tools": ["web_search", "web_fetch"]
            })
        })
        .collect();
    json!({
        "subagent_count": tasks.len(),
        "tasks": tasks,
        "synthesis_approach": "Chronological"
    })
    .to_string()
}

pub fn evaluation_json(needs_more: bool, score: f64, extra_tasks: &[&str]) -> String {
    let tasks: Vec<Value> = extra_tasks
        .iter()
        .map(|d| json!({"description": d, "search_queries": [d], "tools": ["web_search"]}))
        .collect();
    json!({
        "is_complete": !needs_more,
        "needs_more": needs_more,
        "completeness_score": score,
        "missing_aspects": [],
        "additional_tasks": tasks
    })
    .to_string()
}

/// Returns two results per query, with URLs derived from the query text
pub struct MockSearchTool {
    pub calls: AtomicUsize,
}

impl MockSearchTool {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Tool for MockSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "scripted search"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"query": {"type": "string"}}})
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let query = args["query"].as_str().unwrap_or_default();
        let slug = query.to_lowercase().replace(' ', "-");
        Ok(json!({
            "query": query,
            "count": 2,
            "results": [
                {"title": format!("{} overview", query), "snippet": "Overview snippet", "url": format!("https://docs.example/{}", slug)},
                {"title": format!("{} news", query), "snippet": "News snippet", "url": format!("https://news.example/{}", slug)}
            ]
        }))
    }
}

pub struct MockFetchTool;

#[async_trait]
impl Tool for MockFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "scripted fetch"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"url": {"type": "string"}}})
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let url = args["url"].as_str().unwrap_or_default();
        Ok(json!({
            "url": url,
            "title": "Fetched page",
            "content": format!("Full text of {}", url),
            "status": 200
        }))
    }
}

/// A search tool that always fails
pub struct BrokenSearchTool;

#[async_trait]
impl Tool for BrokenSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "always fails"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _args: Value) -> Result<Value> {
        Err(AppError::Tool("search backend unavailable".to_string()))
    }
}

pub fn mock_tools() -> (ToolRegistry, Arc<MockSearchTool>) {
    let search = Arc::new(MockSearchTool::new());
    let mut registry = ToolRegistry::new();
    registry.register(search.clone());
    registry.register(Arc::new(MockFetchTool));
    (registry, search)
}
