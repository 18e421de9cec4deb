//! Multi-agent research pipeline
//!
//! A lead agent classifies the query and plans subagent tasks, a dispatcher
//! fans the tasks out to parallel subagents, the lead evaluates completeness
//! (looping back for more research when needed), then synthesizes a report
//! that the citation stage annotates.
//!
//! # Usage
//!
//! ```ignore
//! use deep_research::research::{ResearchWorkflow, RunOptions};
//!
//! let workflow = ResearchWorkflow::new(config, clients, tools).with_store(store);
//! let report = workflow
//!     .run_research("What are the latest developments in quantum computing?", RunOptions::default())
//!     .await?;
//!
//! println!("{}", report.best_text());
//! ```

pub mod citation;
pub mod dispatcher;
pub mod lead;
pub mod prompts;
pub mod session;
pub mod state;
pub mod subagent;
pub mod workflow;

pub use dispatcher::{DispatchedTask, Dispatcher, SubagentRunner, ToolSubagentRunner};
pub use state::Stage;
pub use workflow::{ResearchWorkflow, RunOptions, WorkflowEvent};
