//! # deep-research
//!
//! A multi-agent research pipeline. A lead agent analyzes a query and plans
//! focused research tasks, parallel subagents work the web search and fetch
//! tools, and the lead evaluates coverage, loops for more research when
//! needed, then synthesizes a report that a citation agent annotates.
//!
//! The crate ships as a library, a CLI, and an HTTP server.
//!
//! ## Library usage
//!
//! ```rust,ignore
//! use deep_research::{AgentClients, ConfigManager, ResearchStore, ResearchWorkflow, RunOptions, ToolRegistry};
//! use deep_research::utils::rate_limiter::RateLimiters;
//! use std::sync::Arc;
//!
//! let config = Arc::new(ConfigManager::new("research.toml")?);
//! let cfg = config.config();
//! let limiters = RateLimiters::from_config(&cfg.rate_limits);
//! let store = Arc::new(ResearchStore::new_local(&cfg.database.path).await?);
//!
//! let clients = AgentClients::from_config(&cfg, &limiters)?;
//! let tools = ToolRegistry::with_default_tools(&limiters, Some(store.clone()));
//! let workflow = ResearchWorkflow::new(config, clients, tools).with_store(store);
//!
//! let report = workflow.run_research("How do CRDTs handle deletes?", RunOptions::default()).await?;
//! println!("{}", report.best_text());
//! ```
//!
//! ## Modules
//!
//! - [`research`] - Lead agent, subagents, dispatcher, citation and the workflow
//! - [`llm`] - Anthropic client and rate-limited wrappers
//! - [`tools`] - Web search, web fetch and memory tools
//! - [`db`] - libsql persistence of plans, results, memory and reports
//! - [`api`] - REST API
//! - [`cli`] - Command-line interface
//! - [`utils`] - Configuration, rate limiting and JSON helpers

/// HTTP API handlers and routes.
pub mod api;
/// Command-line interface.
pub mod cli;
/// Research persistence.
pub mod db;
/// LLM clients.
pub mod llm;
/// The research pipeline.
pub mod research;
/// Tools available to agents.
pub mod tools;
/// Core types (requests, responses, errors).
pub mod types;
/// Configuration, rate limiting and parsing helpers.
pub mod utils;

pub use db::ResearchStore;
pub use llm::{AgentClients, LLMClient, LLMResponse, Provider};
pub use research::{ResearchWorkflow, RunOptions};
pub use tools::ToolRegistry;
pub use types::{AppError, Result};
pub use utils::toml_config::{ConfigManager, ResearchConfig};

use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Configuration with hot-reload support
    pub config_manager: Arc<ConfigManager>,
    /// Research persistence
    pub store: Arc<ResearchStore>,
    /// The research pipeline
    pub workflow: Arc<ResearchWorkflow>,
    /// Bearer key required on `/api` routes, when set
    pub api_key: Option<String>,
}
