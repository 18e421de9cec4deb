//! Fans subagent tasks out to concurrent workers in fixed-size batches

use crate::llm::LLMClient;
use crate::research::subagent::{Subagent, SubagentLimits};
use crate::tools::ToolRegistry;
use crate::types::{Result, SubagentResult, SubagentTask};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{error, info};

/// A task paired with the id of the agent that will run it
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedTask {
    pub agent_id: String,
    pub task: SubagentTask,
}

/// Executes a single subagent task
#[async_trait]
pub trait SubagentRunner: Send + Sync {
    async fn run(&self, agent_id: String, task: SubagentTask) -> Result<SubagentResult>;
}

/// Production runner: a [`Subagent`] over the shared subagent tools
pub struct ToolSubagentRunner {
    client: Arc<dyn LLMClient>,
    tools: ToolRegistry,
    limits: SubagentLimits,
}

impl ToolSubagentRunner {
    pub fn new(client: Arc<dyn LLMClient>, tools: ToolRegistry, limits: SubagentLimits) -> Self {
        Self {
            client,
            tools,
            limits,
        }
    }
}

#[async_trait]
impl SubagentRunner for ToolSubagentRunner {
    async fn run(&self, agent_id: String, task: SubagentTask) -> Result<SubagentResult> {
        let subagent = Subagent::new(
            agent_id,
            task,
            Arc::clone(&self.client),
            &self.tools,
            self.limits,
        );
        Ok(subagent.execute().await)
    }
}

pub struct Dispatcher {
    max_concurrent: usize,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            timeout,
        }
    }

    /// Assign each task a short agent id
    pub fn dispatch(&self, tasks: Vec<SubagentTask>) -> Vec<DispatchedTask> {
        tasks
            .into_iter()
            .map(|task| DispatchedTask {
                agent_id: new_agent_id(),
                task,
            })
            .collect()
    }

    /// Run every task, `max_concurrent` at a time. Batches run one after
    /// another; results come back in dispatch order and failures (errors,
    /// panics, timeouts) are returned as failed results.
    pub async fn execute_parallel(
        &self,
        dispatched: &[DispatchedTask],
        runner: Arc<dyn SubagentRunner>,
    ) -> Vec<SubagentResult> {
        let mut results = Vec::with_capacity(dispatched.len());
        let batches = dispatched.len().div_ceil(self.max_concurrent);

        for (batch_idx, batch) in dispatched.chunks(self.max_concurrent).enumerate() {
            info!(
                "Executing subagent batch {}/{} ({} agents)",
                batch_idx + 1,
                batches,
                batch.len()
            );

            let handles: Vec<_> = batch
                .iter()
                .map(|item| {
                    let runner = Arc::clone(&runner);
                    let agent_id = item.agent_id.clone();
                    let task = item.task.clone();
                    let timeout = self.timeout;
                    tokio::spawn(async move {
                        tokio::time::timeout(timeout, runner.run(agent_id, task)).await
                    })
                })
                .collect();

            let _abort = AbortOnDrop(handles.iter().map(|h| h.abort_handle()).collect());
            let outcomes = join_all(handles).await;
            for (item, outcome) in batch.iter().zip(outcomes) {
                let description = &item.task.description;
                let result = match outcome {
                    Ok(Ok(Ok(result))) => result,
                    Ok(Ok(Err(e))) => {
                        error!("Subagent {} failed: {}", item.agent_id, e);
                        SubagentResult::failed(&item.agent_id, description, e.to_string())
                    }
                    Ok(Err(_)) => {
                        error!(
                            "Subagent {} timed out after {:?}",
                            item.agent_id, self.timeout
                        );
                        SubagentResult::failed(
                            &item.agent_id,
                            description,
                            format!("Timed out after {}s", self.timeout.as_secs()),
                        )
                    }
                    Err(join_err) => {
                        error!("Subagent {} panicked: {}", item.agent_id, join_err);
                        SubagentResult::failed(
                            &item.agent_id,
                            description,
                            format!("Subagent task aborted: {}", join_err),
                        )
                    }
                };
                results.push(result);
            }
        }

        results
    }
}

/// Aborts spawned workers if the batch is dropped mid-flight
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

fn new_agent_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Behaviour is picked from the task description
    struct ScriptedRunner {
        running: AtomicUsize,
        peak: AtomicUsize,
        finished: AtomicUsize,
    }

    impl ScriptedRunner {
        fn new() -> Self {
            Self {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SubagentRunner for ScriptedRunner {
        async fn run(&self, agent_id: String, task: SubagentTask) -> Result<SubagentResult> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            match task.description.as_str() {
                "error" => Err(AppError::LLM("boom".into())),
                "panic" => panic!("worker exploded"),
                "hang" => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    self.finished.fetch_add(1, Ordering::SeqCst);
                    Ok(SubagentResult::default())
                }
                _ => Ok(SubagentResult {
                    agent_id,
                    task: task.description,
                    success: true,
                    ..Default::default()
                }),
            }
        }
    }

    fn tasks(descriptions: &[&str]) -> Vec<SubagentTask> {
        descriptions.iter().map(|d| SubagentTask::new(*d)).collect()
    }

    #[test]
    fn test_dispatch_assigns_unique_ids() {
        let dispatcher = Dispatcher::new(2, Duration::from_secs(1));
        let dispatched = dispatcher.dispatch(tasks(&["a", "b", "c"]));

        assert_eq!(dispatched.len(), 3);
        assert!(dispatched.iter().all(|d| d.agent_id.len() == 8));
        assert_ne!(dispatched[0].agent_id, dispatched[1].agent_id);
        assert_eq!(dispatched[2].task.description, "c");
    }

    #[tokio::test]
    async fn test_results_keep_dispatch_order_and_respect_concurrency() {
        let dispatcher = Dispatcher::new(2, Duration::from_secs(5));
        let dispatched = dispatcher.dispatch(tasks(&["a", "b", "c", "d", "e"]));
        let runner = Arc::new(ScriptedRunner::new());

        let results = dispatcher
            .execute_parallel(&dispatched, runner.clone())
            .await;

        let order: Vec<&str> = results.iter().map(|r| r.task.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d", "e"]);
        assert!(results.iter().all(|r| r.success));
        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_errors_and_panics_become_failed_results() {
        let dispatcher = Dispatcher::new(3, Duration::from_secs(5));
        let dispatched = dispatcher.dispatch(tasks(&["ok", "error", "panic"]));

        let results = dispatcher
            .execute_parallel(&dispatched, Arc::new(ScriptedRunner::new()))
            .await;

        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[1].error.as_deref().unwrap().contains("boom"));
        assert!(!results[2].success);
        assert_eq!(results[2].agent_id, dispatched[2].agent_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_failed_result() {
        let dispatcher = Dispatcher::new(2, Duration::from_secs(30));
        let dispatched = dispatcher.dispatch(tasks(&["hang", "ok"]));

        let results = dispatcher
            .execute_parallel(&dispatched, Arc::new(ScriptedRunner::new()))
            .await;

        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("Timed out"));
        assert!(results[1].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_execution_aborts_workers() {
        let dispatcher = Dispatcher::new(2, Duration::from_secs(30));
        let dispatched = dispatcher.dispatch(tasks(&["slow", "slow"]));
        let runner = Arc::new(ScriptedRunner::new());

        let cut_short = tokio::time::timeout(
            Duration::from_millis(100),
            dispatcher.execute_parallel(&dispatched, runner.clone()),
        )
        .await;
        assert!(cut_short.is_err());

        // Long enough for the workers to finish had they kept running
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runner.finished.load(Ordering::SeqCst), 0);
    }
}
