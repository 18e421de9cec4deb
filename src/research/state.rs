//! Mutable state carried through one research run

use crate::research::dispatcher::DispatchedTask;
use crate::types::{
    CitationVerification, Evaluation, Finding, QueryAnalysis, ResearchPlan, Source, SubagentResult,
    SubagentTask,
};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tokio::time::Instant;

/// Workflow stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Analyze,
    Plan,
    Dispatch,
    Execute,
    Evaluate,
    Synthesize,
    Cite,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Analyze => "analyze",
            Stage::Plan => "plan",
            Stage::Dispatch => "dispatch",
            Stage::Execute => "execute",
            Stage::Evaluate => "evaluate",
            Stage::Synthesize => "synthesize",
            Stage::Cite => "cite",
            Stage::Complete => "complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct ResearchState {
    pub query_id: String,
    pub query: String,
    pub started: Instant,

    pub analysis: QueryAnalysis,
    pub plan: Option<ResearchPlan>,
    pub plan_persisted: bool,

    pub pending_tasks: Vec<SubagentTask>,
    pub dispatched: Vec<DispatchedTask>,
    pub active_agents: Vec<String>,
    pub completed_agents: Vec<String>,
    pub failed_agents: Vec<String>,
    pub subagent_results: Vec<SubagentResult>,

    pub findings: Vec<Finding>,
    pub sources: Vec<Source>,
    seen_source_urls: HashSet<String>,

    pub iteration: u32,
    pub max_iterations: u32,
    pub needs_more_research: bool,
    pub evaluation: Option<Evaluation>,

    pub synthesized_text: String,
    pub cited_text: String,
    pub verification: CitationVerification,

    pub errors: Vec<String>,
}

impl ResearchState {
    pub fn new(query_id: impl Into<String>, query: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            query_id: query_id.into(),
            query: query.into(),
            started: Instant::now(),
            analysis: QueryAnalysis::default(),
            plan: None,
            plan_persisted: false,
            pending_tasks: Vec::new(),
            dispatched: Vec::new(),
            active_agents: Vec::new(),
            completed_agents: Vec::new(),
            failed_agents: Vec::new(),
            subagent_results: Vec::new(),
            findings: Vec::new(),
            sources: Vec::new(),
            seen_source_urls: HashSet::new(),
            iteration: 0,
            max_iterations,
            needs_more_research: false,
            evaluation: None,
            synthesized_text: String::new(),
            cited_text: String::new(),
            verification: CitationVerification::default(),
            errors: Vec::new(),
        }
    }

    /// Add a source unless its URL is already known. URL-less sources are kept.
    pub fn add_source(&mut self, source: Source) -> bool {
        if !source.url.is_empty() && !self.seen_source_urls.insert(source.url.clone()) {
            return false;
        }
        self.sources.push(source);
        true
    }

    /// Fold a batch of worker results into the run. Counts as one iteration.
    pub fn absorb_results(&mut self, results: Vec<SubagentResult>) {
        self.iteration += 1;

        for result in results {
            self.active_agents.retain(|id| id != &result.agent_id);
            if result.success {
                self.completed_agents.push(result.agent_id.clone());
            } else {
                self.failed_agents.push(result.agent_id.clone());
                self.errors.push(format!(
                    "{}: {}",
                    result.agent_id,
                    result.error.as_deref().unwrap_or("unknown error")
                ));
            }

            // Partial findings from failed workers are kept
            self.findings.extend(result.findings.iter().cloned());
            for source in &result.sources {
                self.add_source(source.clone());
            }
            self.subagent_results.push(result);
        }
    }

    /// Record an evaluation; its additional tasks become the next dispatch
    pub fn apply_evaluation(&mut self, evaluation: Evaluation, max_tasks: usize) {
        self.needs_more_research = evaluation.needs_more
            && self.iteration < self.max_iterations
            && !evaluation.additional_tasks.is_empty();

        self.pending_tasks = if self.needs_more_research {
            evaluation
                .additional_tasks
                .iter()
                .take(max_tasks)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        self.evaluation = Some(evaluation);
    }

    pub fn subagent_tokens(&self) -> u64 {
        self.subagent_results.iter().map(|r| r.tokens_used).sum()
    }
}

/// Loop back for another round while more research is wanted and allowed
pub fn route_after_evaluation(state: &ResearchState) -> Stage {
    if state.needs_more_research && state.iteration < state.max_iterations {
        Stage::Dispatch
    } else {
        Stage::Synthesize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FindingOrigin;

    fn result(agent_id: &str, success: bool, urls: &[&str]) -> SubagentResult {
        SubagentResult {
            agent_id: agent_id.to_string(),
            task: "t".to_string(),
            success,
            findings: urls
                .iter()
                .map(|u| Finding {
                    title: "f".into(),
                    content: "c".into(),
                    url: u.to_string(),
                    origin: FindingOrigin::WebSearch,
                })
                .collect(),
            sources: urls
                .iter()
                .map(|u| Source {
                    title: "s".into(),
                    url: u.to_string(),
                })
                .collect(),
            error: (!success).then(|| "boom".to_string()),
            ..Default::default()
        }
    }

    fn evaluation(needs_more: bool, tasks: usize) -> Evaluation {
        Evaluation {
            needs_more,
            additional_tasks: (0..tasks).map(|i| SubagentTask::new(format!("extra {}", i))).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_absorb_results() {
        let mut state = ResearchState::new("q", "query", 3);
        state.active_agents = vec!["a".into(), "b".into()];

        state.absorb_results(vec![
            result("a", true, &["https://x", "https://y"]),
            result("b", false, &["https://y"]),
        ]);

        assert_eq!(state.iteration, 1);
        assert!(state.active_agents.is_empty());
        assert_eq!(state.completed_agents, vec!["a"]);
        assert_eq!(state.failed_agents, vec!["b"]);
        assert_eq!(state.findings.len(), 3);
        assert_eq!(state.sources.len(), 2);
        assert_eq!(state.errors, vec!["b: boom"]);
    }

    #[test]
    fn test_routing_loops_while_allowed() {
        let mut state = ResearchState::new("q", "query", 2);
        state.iteration = 1;
        state.apply_evaluation(evaluation(true, 2), 20);
        assert!(state.needs_more_research);
        assert_eq!(state.pending_tasks.len(), 2);
        assert_eq!(route_after_evaluation(&state), Stage::Dispatch);
    }

    #[test]
    fn test_routing_stops_at_iteration_limit() {
        let mut state = ResearchState::new("q", "query", 2);
        state.iteration = 2;
        state.apply_evaluation(evaluation(true, 2), 20);
        assert!(!state.needs_more_research);
        assert_eq!(route_after_evaluation(&state), Stage::Synthesize);
    }

    #[test]
    fn test_routing_stops_without_additional_tasks() {
        let mut state = ResearchState::new("q", "query", 5);
        state.iteration = 1;
        state.apply_evaluation(evaluation(true, 0), 20);
        assert_eq!(route_after_evaluation(&state), Stage::Synthesize);
    }

    #[test]
    fn test_additional_tasks_are_capped() {
        let mut state = ResearchState::new("q", "query", 5);
        state.iteration = 1;
        state.apply_evaluation(evaluation(true, 30), 20);
        assert_eq!(state.pending_tasks.len(), 20);
    }
}
