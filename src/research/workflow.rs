//! The research state machine
//!
//! ```text
//! Analyze -> Plan -> Dispatch -> Execute -> Evaluate -+-> Synthesize -> Cite -> Complete
//!                       ^                             |
//!                       +------- more research -------+
//! ```
//!
//! Each run is registered as a session so it can be observed and cancelled.
//! Cancellation is checked between stages.

use crate::db::ResearchStore;
use crate::llm::AgentClients;
use crate::research::citation::{CitationAgent, verify_citations};
use crate::research::dispatcher::{Dispatcher, SubagentRunner, ToolSubagentRunner};
use crate::research::lead::LeadAgent;
use crate::research::session::SessionRegistry;
use crate::research::state::{ResearchState, Stage, route_after_evaluation};
use crate::research::subagent::SubagentLimits;
use crate::tools::{AgentRole, ToolRegistry};
use crate::types::{AppError, ResearchMetrics, ResearchReport, Result, SessionStatus, SubagentResult};
use crate::utils::toml_config::{ConfigManager, ResearchSettings};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// Marks a run as aborted when its future is dropped before `drive` returns
struct AbortGuard<'a> {
    sessions: &'a SessionRegistry,
    store: Option<Arc<ResearchStore>>,
    query_id: String,
    armed: bool,
}

impl Drop for AbortGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        warn!("Research {} aborted before finishing", self.query_id);
        self.sessions.fail(&self.query_id, "aborted");

        let Some(store) = self.store.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let query_id = self.query_id.clone();
        handle.spawn(async move {
            match store.update_plan_status(&query_id, "failed").await {
                // The plan was never saved
                Ok(()) | Err(AppError::NotFound(_)) => {}
                Err(e) => warn!("Failed to mark plan {} as failed: {}", query_id, e),
            }
        });
    }
}

/// Progress notifications emitted while a run advances
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    StageStarted {
        query_id: String,
        stage: Stage,
    },
    PlanCreated {
        tasks: usize,
    },
    SubagentFinished {
        agent_id: String,
        success: bool,
        findings: usize,
    },
    Evaluated {
        iteration: u32,
        completeness_score: f64,
        needs_more: bool,
    },
    Completed {
        metrics: ResearchMetrics,
    },
}

/// Per-run overrides of the configured limits
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_iterations: Option<u32>,
    pub max_concurrent_subagents: Option<usize>,
    /// Save plan, worker results and report when a store is attached
    pub persist: bool,
    pub events: Option<UnboundedSender<WorkflowEvent>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_iterations: None,
            max_concurrent_subagents: None,
            persist: true,
            events: None,
        }
    }
}

impl RunOptions {
    fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.events {
            // Receiver may have gone away
            let _ = tx.send(event);
        }
    }
}

pub struct ResearchWorkflow {
    config: Arc<ConfigManager>,
    clients: AgentClients,
    tools: ToolRegistry,
    store: Option<Arc<ResearchStore>>,
    runner: Option<Arc<dyn SubagentRunner>>,
    sessions: SessionRegistry,
}

impl ResearchWorkflow {
    pub fn new(config: Arc<ConfigManager>, clients: AgentClients, tools: ToolRegistry) -> Self {
        Self {
            config,
            clients,
            tools,
            store: None,
            runner: None,
            sessions: SessionRegistry::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<ResearchStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the tool-driven subagents with a custom runner
    pub fn with_runner(mut self, runner: Arc<dyn SubagentRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn store(&self) -> Option<&Arc<ResearchStore>> {
        self.store.as_ref()
    }

    pub fn session_status(&self, query_id: &str) -> Option<SessionStatus> {
        self.sessions.status(query_id)
    }

    pub fn list_sessions(&self) -> Vec<SessionStatus> {
        self.sessions.list()
    }

    /// Request cancellation; the run stops before its next stage
    pub fn cancel_research(&self, query_id: &str) -> Result<()> {
        if self.sessions.cancel(query_id) {
            info!("Cancellation requested for {}", query_id);
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Active research session {}", query_id)))
        }
    }

    fn subagent_runner(&self, settings: &ResearchSettings) -> Arc<dyn SubagentRunner> {
        match &self.runner {
            Some(runner) => Arc::clone(runner),
            None => Arc::new(ToolSubagentRunner::new(
                Arc::clone(&self.clients.subagent),
                self.tools.for_role(AgentRole::Subagent),
                SubagentLimits {
                    max_iterations: settings.max_subagent_iterations,
                    sufficient_findings: settings.sufficient_findings,
                },
            )),
        }
    }

    fn persisting(&self, options: &RunOptions) -> Option<&Arc<ResearchStore>> {
        self.store.as_ref().filter(|_| options.persist)
    }

    /// Run the full pipeline for one query
    pub async fn run_research(&self, query: &str, options: RunOptions) -> Result<ResearchReport> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::InvalidInput("Query must not be empty".to_string()));
        }

        let settings = self.config.config().research.clone();
        let max_iterations = options
            .max_iterations
            .unwrap_or(settings.max_iterations)
            .max(1);

        let query_id = uuid::Uuid::new_v4().to_string();
        let cancel = self.sessions.register(&query_id, query);
        info!("Starting research {}: {}", query_id, query);

        let mut guard = AbortGuard {
            sessions: &self.sessions,
            store: self.persisting(&options).cloned(),
            query_id: query_id.clone(),
            armed: true,
        };

        let mut state = ResearchState::new(&query_id, query, max_iterations);
        let outcome = self
            .drive(&mut state, &settings, &options, &cancel)
            .await;
        guard.armed = false;

        match outcome {
            Ok(report) => {
                self.sessions.remove(&query_id);
                Ok(report)
            }
            Err(e) => {
                warn!("Research {} failed: {}", query_id, e);
                self.sessions.fail(&query_id, e.to_string());

                if let Some(store) = self.persisting(&options).filter(|_| state.plan_persisted) {
                    let status = if matches!(e, AppError::Cancelled(_)) {
                        "cancelled"
                    } else {
                        "failed"
                    };
                    if let Err(db_err) = store.update_plan_status(&query_id, status).await {
                        warn!("Failed to mark plan {} as {}: {}", query_id, status, db_err);
                    }
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        state: &mut ResearchState,
        settings: &ResearchSettings,
        options: &RunOptions,
        cancel: &AtomicBool,
    ) -> Result<ResearchReport> {
        let lead = LeadAgent::new(
            Arc::clone(&self.clients.lead),
            settings.max_subagents_per_plan,
            settings.synthesis_source_limit,
        );
        let citation = CitationAgent::new(Arc::clone(&self.clients.citation));
        let dispatcher = Dispatcher::new(
            options
                .max_concurrent_subagents
                .unwrap_or(settings.max_concurrent_subagents),
            Duration::from_secs(settings.subagent_timeout_secs),
        );
        let runner = self.subagent_runner(settings);

        let mut stage = Stage::Analyze;
        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(AppError::Cancelled(format!(
                    "{} stopped before {}",
                    state.query_id, stage
                )));
            }

            self.sessions.set_stage(&state.query_id, stage);
            options.emit(WorkflowEvent::StageStarted {
                query_id: state.query_id.clone(),
                stage,
            });
            info!("[{}] stage: {}", state.query_id, stage);

            stage = match stage {
                Stage::Analyze => {
                    state.analysis = lead.analyze_query(&state.query).await?;
                    Stage::Plan
                }
                Stage::Plan => {
                    let plan = lead.create_plan(&state.query, &state.analysis).await?;
                    options.emit(WorkflowEvent::PlanCreated {
                        tasks: plan.tasks.len(),
                    });
                    state.pending_tasks = plan.tasks.clone();

                    if let Some(store) = self.persisting(options) {
                        match store
                            .save_research_plan(&state.query_id, &state.query, &state.analysis, &plan)
                            .await
                        {
                            Ok(()) => state.plan_persisted = true,
                            Err(e) => warn!("Failed to save research plan: {}", e),
                        }
                    }

                    state.plan = Some(plan);
                    Stage::Dispatch
                }
                Stage::Dispatch => {
                    let tasks = std::mem::take(&mut state.pending_tasks);
                    state.dispatched = dispatcher.dispatch(tasks);
                    state.active_agents = state
                        .dispatched
                        .iter()
                        .map(|d| d.agent_id.clone())
                        .collect();
                    info!("Dispatched {} subagents", state.dispatched.len());
                    Stage::Execute
                }
                Stage::Execute => {
                    let results = dispatcher
                        .execute_parallel(&state.dispatched, Arc::clone(&runner))
                        .await;
                    self.record_results(state, &results, options).await;
                    state.absorb_results(results);
                    info!(
                        "Iteration {}: {} findings, {} sources, {} failed agents",
                        state.iteration,
                        state.findings.len(),
                        state.sources.len(),
                        state.failed_agents.len()
                    );
                    Stage::Evaluate
                }
                Stage::Evaluate => {
                    let evaluation = lead
                        .evaluate_completeness(&state.query, &state.findings, state.iteration)
                        .await?;
                    options.emit(WorkflowEvent::Evaluated {
                        iteration: state.iteration,
                        completeness_score: evaluation.completeness_score,
                        needs_more: evaluation.needs_more,
                    });
                    state.apply_evaluation(evaluation, settings.max_subagents_per_plan);
                    route_after_evaluation(state)
                }
                Stage::Synthesize => {
                    let plan = state.plan.clone().unwrap_or_default();
                    let synthesis = lead.synthesize(&state.query, &state.findings, &plan).await?;
                    state.synthesized_text = synthesis.report;
                    state.sources = synthesis.sources;
                    Stage::Cite
                }
                Stage::Cite => {
                    state.cited_text = citation
                        .add_citations(&state.synthesized_text, &state.sources)
                        .await?;
                    state.verification = verify_citations(&state.cited_text, &state.sources);
                    Stage::Complete
                }
                Stage::Complete => {
                    let total_tokens =
                        lead.tokens_used() + citation.tokens_used() + state.subagent_tokens();
                    return Ok(self.complete(state, total_tokens, options).await);
                }
            };
        }
    }

    async fn record_results(
        &self,
        state: &ResearchState,
        results: &[SubagentResult],
        options: &RunOptions,
    ) {
        for result in results {
            options.emit(WorkflowEvent::SubagentFinished {
                agent_id: result.agent_id.clone(),
                success: result.success,
                findings: result.findings.len(),
            });
            if let Some(store) = self.persisting(options) {
                if let Err(e) = store.save_subagent_result(&state.query_id, result).await {
                    warn!("Failed to save result of {}: {}", result.agent_id, e);
                }
            }
        }
    }

    async fn complete(
        &self,
        state: &mut ResearchState,
        total_tokens: u64,
        options: &RunOptions,
    ) -> ResearchReport {
        let metrics = ResearchMetrics {
            total_tokens,
            execution_time_secs: state.started.elapsed().as_secs_f64(),
            iterations: state.iteration,
            subagents_completed: state.completed_agents.len(),
            subagents_failed: state.failed_agents.len(),
            sources: state.sources.len(),
        };

        info!(
            "Research {} complete in {:.1}s: {} iterations, {} subagents ({} failed), {} sources, {} tokens",
            state.query_id,
            metrics.execution_time_secs,
            metrics.iterations,
            metrics.subagents_completed + metrics.subagents_failed,
            metrics.subagents_failed,
            metrics.sources,
            metrics.total_tokens
        );

        let mut report = ResearchReport {
            query_id: state.query_id.clone(),
            report_id: None,
            query: state.query.clone(),
            analysis: state.analysis.clone(),
            synthesized_text: std::mem::take(&mut state.synthesized_text),
            cited_text: std::mem::take(&mut state.cited_text),
            sources: state.sources.clone(),
            metrics: metrics.clone(),
            verification: state.verification.clone(),
        };

        if let Some(store) = self.persisting(options) {
            let report_id = uuid::Uuid::new_v4().to_string();
            match store.save_research_report(&report_id, &report).await {
                Ok(()) => report.report_id = Some(report_id),
                Err(e) => warn!("Failed to save research report: {}", e),
            }
            if state.plan_persisted {
                if let Err(e) = store.update_plan_status(&state.query_id, "completed").await {
                    warn!("Failed to mark plan {} completed: {}", state.query_id, e);
                }
            }
        }

        options.emit(WorkflowEvent::Completed { metrics });
        report
    }
}
