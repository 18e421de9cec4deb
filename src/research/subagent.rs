//! Research subagent: a budgeted observe-orient-decide-act loop over the
//! search and fetch tools.

use crate::llm::{GenerationParams, LLMClient};
use crate::research::prompts;
use crate::tools::ToolRegistry;
use crate::types::{AppError, Finding, FindingOrigin, Result, Source, SubagentResult, SubagentTask};
use crate::utils::json::truncate_chars;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Characters of fetched page content kept per finding
const FETCHED_CONTENT_CHARS: usize = 3000;
const SEARCH_RESULTS_PER_CALL: u64 = 5;
const SUMMARY_FINDINGS: usize = 10;

/// Limits shared by every subagent in a run
#[derive(Debug, Clone, Copy)]
pub struct SubagentLimits {
    /// Hard cap on loop iterations regardless of budget
    pub max_iterations: usize,
    /// Stop once this many findings are held
    pub sufficient_findings: usize,
}

impl Default for SubagentLimits {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            sufficient_findings: 5,
        }
    }
}

/// Tool-call budget derived from the wording of the task
pub fn tool_budget(description: &str) -> usize {
    let words: HashSet<String> = description
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    let has_any = |keys: &[&str]| keys.iter().any(|k| words.contains(*k));

    if has_any(&["comprehensive", "detailed", "all", "complete"]) {
        15
    } else if has_any(&["compare", "analyze", "multiple"]) {
        10
    } else if has_any(&["find", "search", "identify"]) {
        7
    } else {
        5
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Nothing found yet
    Initial,
    /// Some findings, still building breadth
    Gathering,
    /// Enough material to wrap up
    Refining,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Search(String),
    Fetch(String),
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub findings: usize,
    pub sources: usize,
    pub calls_remaining: usize,
}

pub struct Subagent {
    agent_id: String,
    task: SubagentTask,
    client: Arc<dyn LLMClient>,
    tools: ToolRegistry,
    allowed_tools: Vec<String>,
    limits: SubagentLimits,
    budget: usize,
    tool_calls: usize,
    findings: Vec<Finding>,
    sources: Vec<Source>,
    seen_urls: HashSet<String>,
    fetched: HashSet<String>,
    queries_issued: usize,
    tokens_used: u64,
}

impl Subagent {
    /// `tools` is narrowed to the tools the task allows
    pub fn new(
        agent_id: impl Into<String>,
        task: SubagentTask,
        client: Arc<dyn LLMClient>,
        tools: &ToolRegistry,
        limits: SubagentLimits,
    ) -> Self {
        let allowed_tools = task.effective_tools();
        let budget = tool_budget(&task.description);
        let agent_id = agent_id.into();
        debug!("Subagent {} initialized with budget {}", agent_id, budget);

        Self {
            agent_id,
            tools: tools.subset(&allowed_tools),
            allowed_tools,
            task,
            client,
            limits,
            budget,
            tool_calls: 0,
            findings: Vec::new(),
            sources: Vec::new(),
            seen_urls: HashSet::new(),
            fetched: HashSet::new(),
            queries_issued: 0,
            tokens_used: 0,
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Run the task to completion. Failures are reported in the result, with
    /// whatever findings were gathered before the failure.
    pub async fn execute(mut self) -> SubagentResult {
        let started = Instant::now();
        info!(
            "Subagent {} starting: {}",
            self.agent_id,
            truncate_chars(&self.task.description, 100)
        );

        let outcome = self.research().await;
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let (success, summary, error) = match outcome {
            Ok(summary) => {
                info!(
                    "Subagent {} completed: {} findings, {} tool calls",
                    self.agent_id,
                    self.findings.len(),
                    self.tool_calls
                );
                (true, summary, None)
            }
            Err(e) => {
                error!("Subagent {} failed: {}", self.agent_id, e);
                (false, String::new(), Some(e.to_string()))
            }
        };

        SubagentResult {
            agent_id: self.agent_id,
            task: self.task.description,
            success,
            findings: self.findings,
            sources: self.sources,
            summary,
            tool_calls: self.tool_calls,
            execution_time_ms,
            tokens_used: self.tokens_used,
            error,
        }
    }

    async fn research(&mut self) -> Result<String> {
        self.plan().await?;

        let max_iterations = self.budget.min(self.limits.max_iterations);
        let mut iteration = 0;

        while iteration < max_iterations && self.tool_calls < self.budget {
            iteration += 1;

            let observation = self.observe();
            let orientation = self.orient(&observation);
            let action = self.decide(orientation);
            if action == Action::Complete {
                break;
            }

            self.act(action).await;

            if self.findings.len() >= self.limits.sufficient_findings {
                info!("Subagent {}: sufficient findings collected", self.agent_id);
                break;
            }
        }

        self.compile().await
    }

    async fn call(&mut self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let response = self.client.generate_with_params(prompt, params).await?;
        self.tokens_used += response.usage.total();
        Ok(response.content)
    }

    async fn plan(&mut self) -> Result<String> {
        let prompt = prompts::subagent_plan(&self.task.description, &self.allowed_tools, self.budget);
        self.call(&prompt, &GenerationParams::new(0.3, 500)).await
    }

    fn observe(&self) -> Observation {
        Observation {
            findings: self.findings.len(),
            sources: self.sources.len(),
            calls_remaining: self.budget.saturating_sub(self.tool_calls),
        }
    }

    fn orient(&self, observation: &Observation) -> Orientation {
        match observation.findings {
            0 => Orientation::Initial,
            n if n < 3 => Orientation::Gathering,
            _ => Orientation::Refining,
        }
    }

    fn decide(&mut self, orientation: Orientation) -> Action {
        if self.tool_calls >= self.budget {
            return Action::Complete;
        }

        match orientation {
            Orientation::Initial => Action::Search(self.next_query()),
            Orientation::Gathering => match self.next_unfetched_source() {
                Some(url) if self.allows("web_fetch") => Action::Fetch(url),
                _ => Action::Search(self.next_query()),
            },
            Orientation::Refining => Action::Complete,
        }
    }

    async fn act(&mut self, action: Action) {
        match action {
            Action::Search(query) => {
                self.tool_calls += 1;
                if let Err(e) = self.search(&query).await {
                    warn!("Search failed for subagent {}: {}", self.agent_id, e);
                }
            }
            Action::Fetch(url) => {
                self.tool_calls += 1;
                self.fetched.insert(url.clone());
                if let Err(e) = self.fetch(&url).await {
                    warn!("Fetch failed for subagent {}: {}", self.agent_id, e);
                }
            }
            Action::Complete => {}
        }
    }

    fn allows(&self, tool: &str) -> bool {
        self.allowed_tools.iter().any(|t| t == tool)
    }

    /// Planned queries first, then the task text, then a refined task text
    fn next_query(&mut self) -> String {
        let idx = self.queries_issued;
        self.queries_issued += 1;

        let planned: Vec<&String> = self
            .task
            .search_queries
            .iter()
            .filter(|q| !q.trim().is_empty())
            .collect();
        if let Some(query) = planned.get(idx) {
            return query.to_string();
        }

        let base = self
            .task
            .description
            .split_whitespace()
            .take(10)
            .collect::<Vec<_>>()
            .join(" ");
        if idx == planned.len() {
            base
        } else {
            format!("{} details specific", base)
        }
    }

    fn next_unfetched_source(&self) -> Option<String> {
        self.sources
            .iter()
            .find(|s| !self.fetched.contains(&s.url))
            .map(|s| s.url.clone())
    }

    async fn search(&mut self, query: &str) -> Result<()> {
        debug!("Subagent {} searching: {}", self.agent_id, query);
        let output = self
            .tools
            .execute(
                "web_search",
                json!({"query": query, "max_results": SEARCH_RESULTS_PER_CALL}),
            )
            .await?;

        let results = output
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::Tool("web_search returned no results array".to_string()))?;

        for item in results {
            let field = |name: &str| {
                item.get(name)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            let (title, snippet, url) = (field("title"), field("snippet"), field("url"));

            if !url.is_empty() && self.seen_urls.insert(url.clone()) {
                self.sources.push(Source {
                    title: title.clone(),
                    url: url.clone(),
                });
            }
            self.findings.push(Finding {
                title,
                content: snippet,
                url,
                origin: FindingOrigin::WebSearch,
            });
        }

        debug!("Subagent {} found {} results", self.agent_id, results.len());
        Ok(())
    }

    async fn fetch(&mut self, url: &str) -> Result<()> {
        debug!("Subagent {} fetching: {}", self.agent_id, url);
        let output = self.tools.execute("web_fetch", json!({"url": url})).await?;

        let title = output
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let content = output
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default();

        self.findings.push(Finding {
            title,
            content: truncate_chars(content, FETCHED_CONTENT_CHARS).to_string(),
            url: url.to_string(),
            origin: FindingOrigin::WebFetch,
        });
        Ok(())
    }

    async fn compile(&mut self) -> Result<String> {
        if self.findings.is_empty() {
            return Ok("No findings collected".to_string());
        }

        let sample = &self.findings[..self.findings.len().min(SUMMARY_FINDINGS)];
        let findings_json = serde_json::to_string_pretty(sample)
            .map_err(|e| AppError::Internal(format!("Failed to serialize findings: {}", e)))?;
        let prompt = prompts::subagent_summary(&self.task.description, &findings_json);

        self.call(&prompt, &GenerationParams::new(0.3, 500)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMResponse, TokenUsage};
    use crate::tools::Tool;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rstest::rstest;

    /// Answers the plan prompt; the summary prompt succeeds or fails
    struct ScriptedLLM {
        fail_summary: bool,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLLM {
        fn new(fail_summary: bool) -> Arc<Self> {
            Arc::new(Self {
                fail_summary,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn summary_calls(&self) -> usize {
            self.prompts
                .lock()
                .iter()
                .filter(|p| p.starts_with("Summarize these research findings"))
                .count()
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedLLM {
        async fn generate_with_params(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> Result<LLMResponse> {
            self.prompts.lock().push(prompt.to_string());
            let is_summary = prompt.starts_with("Summarize these research findings");
            if is_summary && self.fail_summary {
                return Err(AppError::LLM("summary model unavailable".into()));
            }
            Ok(LLMResponse {
                content: if is_summary { "Summary." } else { "Search, then read." }.to_string(),
                finish_reason: "end_turn".to_string(),
                usage: TokenUsage {
                    input_tokens: 3,
                    output_tokens: 2,
                },
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    /// Returns `per_call` results with URLs unique to each call
    struct RecordingSearch {
        per_call: usize,
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Tool for RecordingSearch {
        fn name(&self) -> &str {
            "web_search"
        }

        fn description(&self) -> &str {
            "recording search"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, args: Value) -> Result<Value> {
            let query = args["query"].as_str().unwrap_or_default().to_string();
            let call = {
                let mut queries = self.queries.lock();
                queries.push(query.clone());
                queries.len()
            };
            let results: Vec<Value> = (0..self.per_call)
                .map(|i| {
                    json!({
                        "title": format!("{} #{}", query, i),
                        "snippet": "snippet",
                        "url": format!("https://site.example/{}/{}", call, i)
                    })
                })
                .collect();
            Ok(json!({"query": query, "results": results, "count": self.per_call}))
        }
    }

    struct FailingSearch {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Tool for FailingSearch {
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
            *self.calls.lock() += 1;
            Err(AppError::Tool("search backend down".into()))
        }
    }

    /// Returns a page far longer than a finding may hold
    struct RecordingFetch {
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Tool for RecordingFetch {
        fn name(&self) -> &str {
            "web_fetch"
        }

        fn description(&self) -> &str {
            "recording fetch"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, args: Value) -> Result<Value> {
            let url = args["url"].as_str().unwrap_or_default().to_string();
            self.urls.lock().push(url.clone());
            Ok(json!({"url": url, "title": "Page", "content": "x".repeat(5000), "status": 200}))
        }
    }

    fn search(per_call: usize) -> Arc<RecordingSearch> {
        Arc::new(RecordingSearch {
            per_call,
            queries: Mutex::new(Vec::new()),
        })
    }

    fn fetch() -> Arc<RecordingFetch> {
        Arc::new(RecordingFetch {
            urls: Mutex::new(Vec::new()),
        })
    }

    fn registry(search: Arc<dyn Tool>, fetch: Option<Arc<dyn Tool>>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(search);
        if let Some(fetch) = fetch {
            registry.register(fetch);
        }
        registry
    }

    fn subagent(task: SubagentTask, llm: Arc<ScriptedLLM>, tools: &ToolRegistry) -> Subagent {
        Subagent::new("agent-1", task, llm, tools, SubagentLimits::default())
    }

    #[tokio::test]
    async fn test_searches_then_fetches_then_completes() {
        let (search, fetch, llm) = (search(2), fetch(), ScriptedLLM::new(false));
        let tools = registry(search.clone(), Some(fetch.clone()));
        let task = SubagentTask {
            search_queries: vec!["rust editions".into()],
            ..SubagentTask::new("Summarize the history")
        };

        let result = subagent(task, llm.clone(), &tools).execute().await;

        assert_eq!(*search.queries.lock(), vec!["rust editions"]);
        // The first source is fetched once, then three findings end the loop
        assert_eq!(*fetch.urls.lock(), vec!["https://site.example/1/0"]);
        assert!(result.success);
        assert_eq!(result.tool_calls, 2);
        assert_eq!(result.findings.len(), 3);
        assert_eq!(result.sources.len(), 2);
        assert_eq!(result.summary, "Summary.");
        assert_eq!(result.tokens_used, 10);

        let fetched = &result.findings[2];
        assert_eq!(fetched.origin, FindingOrigin::WebFetch);
        assert_eq!(fetched.content.chars().count(), FETCHED_CONTENT_CHARS);
    }

    #[tokio::test]
    async fn test_search_fallback_and_query_rotation_without_fetch() {
        let (search, fetch, llm) = (search(1), fetch(), ScriptedLLM::new(false));
        let tools = registry(search.clone(), Some(fetch.clone()));
        let task = SubagentTask {
            search_queries: vec!["planned query".into(), "  ".into()],
            tools: vec!["web_search".into()],
            ..SubagentTask::new(
                "Summarize the history of the Rust borrow checker and its many revisions over time",
            )
        };

        let result = subagent(task, llm, &tools).execute().await;

        let base = "Summarize the history of the Rust borrow checker and its";
        assert_eq!(
            *search.queries.lock(),
            vec![
                "planned query".to_string(),
                base.to_string(),
                format!("{} details specific", base),
            ]
        );
        assert!(fetch.urls.lock().is_empty());
        assert_eq!(result.tool_calls, 3);
        assert_eq!(result.findings.len(), 3);
    }

    #[tokio::test]
    async fn test_stops_at_sufficient_findings() {
        let (search, fetch, llm) = (search(5), fetch(), ScriptedLLM::new(false));
        let tools = registry(search.clone(), Some(fetch.clone()));

        let result = subagent(SubagentTask::new("Compare Rust and Go"), llm, &tools)
            .execute()
            .await;

        assert_eq!(search.queries.lock().len(), 1);
        assert!(fetch.urls.lock().is_empty());
        assert_eq!(result.tool_calls, 1);
        assert_eq!(result.findings.len(), 5);
    }

    #[tokio::test]
    async fn test_failed_calls_spend_budget_and_skip_summary() {
        let search = Arc::new(FailingSearch {
            calls: Mutex::new(0),
        });
        let llm = ScriptedLLM::new(false);
        let tools = registry(search.clone(), None);

        let result = subagent(SubagentTask::new("Summarize the history"), llm.clone(), &tools)
            .execute()
            .await;

        assert_eq!(*search.calls.lock(), 5);
        assert_eq!(result.tool_calls, 5);
        assert!(result.success);
        assert!(result.findings.is_empty());
        assert_eq!(result.summary, "No findings collected");
        assert_eq!(llm.summary_calls(), 0);
    }

    #[tokio::test]
    async fn test_summary_failure_keeps_partial_findings() {
        let (search, fetch, llm) = (search(2), fetch(), ScriptedLLM::new(true));
        let tools = registry(search, Some(fetch));

        let result = subagent(SubagentTask::new("Summarize the history"), llm.clone(), &tools)
            .execute()
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("summary model unavailable"));
        assert_eq!(result.findings.len(), 3);
        assert_eq!(result.sources.len(), 2);
        assert!(result.summary.is_empty());
        assert_eq!(llm.summary_calls(), 1);
    }

    #[rstest]
    #[case("Provide a comprehensive overview", 15)]
    #[case("Give all the facts", 15)]
    #[case("Compare Rust and Go", 10)]
    #[case("Analyze market trends", 10)]
    #[case("Find the release date", 7)]
    #[case("Identify key players", 7)]
    #[case("Summarize the history", 5)]
    // Substrings of other words don't count
    #[case("Recall the installation steps", 5)]
    #[case("Research findings on cell walls", 5)]
    fn test_tool_budget(#[case] description: &str, #[case] expected: usize) {
        assert_eq!(tool_budget(description), expected);
    }

    #[test]
    fn test_limits_default() {
        let limits = SubagentLimits::default();
        assert_eq!(limits.max_iterations, 15);
        assert_eq!(limits.sufficient_findings, 5);
    }
}
