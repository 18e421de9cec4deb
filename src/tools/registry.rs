use crate::db::ResearchStore;
use crate::types::{AppError, Result, ToolDefinition};
use crate::utils::rate_limiter::RateLimiters;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, args: Value) -> Result<Value>;
}

/// Agent roles, each with its own view of the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Lead,
    Subagent,
    Citation,
}

impl AgentRole {
    /// Tool names the role may call; `None` means every registered tool
    pub fn allowed_tools(&self) -> Option<&'static [&'static str]> {
        match self {
            AgentRole::Lead => None,
            AgentRole::Subagent => Some(&["web_search", "web_fetch", "memory_store"][..]),
            AgentRole::Citation => Some(&["memory_store"][..]),
        }
    }
}

#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry with web search, page fetch and (when a store is given) memory
    pub fn with_default_tools(limiters: &RateLimiters, store: Option<Arc<ResearchStore>>) -> Self {
        let mut registry = Self::new();

        registry.register(Arc::new(crate::tools::search::WebSearchTool::new(Arc::clone(
            &limiters.web_search,
        ))));
        registry.register(Arc::new(crate::tools::search::WebFetchTool::new(Arc::clone(
            &limiters.web_fetch,
        ))));

        if let Some(store) = store {
            registry.register(Arc::new(crate::tools::memory::MemoryTool::new(store)));
        }

        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get_tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<Value> {
        if let Some(tool) = self.tools.get(name) {
            tool.execute(args).await
        } else {
            Err(AppError::NotFound(format!("Tool not found: {}", name)))
        }
    }

    /// Get a sorted list of all registered tool names
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// A registry holding only the named tools that are registered here
    pub fn subset<S: AsRef<str>>(&self, names: &[S]) -> Self {
        let tools = names
            .iter()
            .filter_map(|name| {
                self.tools
                    .get_key_value(name.as_ref())
                    .map(|(k, v)| (k.clone(), Arc::clone(v)))
            })
            .collect();
        Self { tools }
    }

    pub fn for_role(&self, role: AgentRole) -> Self {
        match role.allowed_tools() {
            Some(names) => self.subset(names),
            None => self.clone(),
        }
    }
}
