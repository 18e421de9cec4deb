//! Tools available to the research agents
//!
//! - [`search`](crate::tools::search) - `web_search` (DuckDuckGo via daedra) and `web_fetch`
//! - [`memory`](crate::tools::memory) - `memory_store`, persistent key/value notes
//! - [`registry`](crate::tools::registry) - registration, lookup and per-role views
//!
//! ```ignore
//! let registry = ToolRegistry::with_default_tools(&limiters, Some(store));
//! let subagent_tools = registry.for_role(AgentRole::Subagent);
//! let result = subagent_tools.execute("web_search", json!({"query": "rust async"})).await?;
//! ```

/// Persistent memory tool.
pub mod memory;
/// Tool registry for managing available tools.
pub mod registry;
/// Web search and page fetch tools.
pub mod search;

pub use registry::{AgentRole, Tool, ToolRegistry};
