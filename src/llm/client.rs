//! LLM client abstraction
//!
//! All model access goes through the [`LLMClient`] trait so the research
//! agents can be driven by the Anthropic client in production and by scripted
//! mocks in tests.

use crate::llm::anthropic::AnthropicClient;
use crate::llm::limited::RateLimitedClient;
use crate::types::Result;
use crate::utils::rate_limiter::{RateLimiters, RetryPolicy};
use crate::utils::toml_config::ResearchConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Generic LLM client trait for provider abstraction
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Generate a completion from a prompt with default parameters
    async fn generate(&self, prompt: &str) -> Result<String> {
        Ok(self
            .generate_with_params(prompt, &GenerationParams::default())
            .await?
            .content)
    }

    /// Generate with system prompt
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        let params = GenerationParams::default().with_system(system);
        Ok(self.generate_with_params(prompt, &params).await?.content)
    }

    /// Generate with explicit sampling parameters, returning usage information
    async fn generate_with_params(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<LLMResponse>;

    /// Get the model name/identifier
    fn model_name(&self) -> &str;
}

/// Sampling parameters for a single request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub system: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4000,
            system: None,
        }
    }
}

impl GenerationParams {
    pub fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
            system: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Response from an LLM generation request
#[derive(Debug, Clone, Default)]
pub struct LLMResponse {
    /// The text content of the response
    pub content: String,
    /// The reason generation stopped (e.g., "end_turn", "max_tokens")
    pub finish_reason: String,
    pub usage: TokenUsage,
}

/// Provider enum for runtime selection
#[derive(Debug, Clone)]
pub enum Provider {
    /// Anthropic Messages API
    Anthropic {
        api_key: String,
        base_url: String,
        model: String,
        timeout_secs: u64,
    },
}

impl Provider {
    /// Create a client instance for this provider
    pub fn create_client(&self) -> Result<Box<dyn LLMClient>> {
        match self {
            Provider::Anthropic {
                api_key,
                base_url,
                model,
                timeout_secs,
            } => Ok(Box::new(AnthropicClient::new(
                api_key.clone(),
                base_url.clone(),
                model.clone(),
                Duration::from_secs(*timeout_secs),
            )?)),
        }
    }
}

/// The three model roles used by a research run
#[derive(Clone)]
pub struct AgentClients {
    pub lead: Arc<dyn LLMClient>,
    pub subagent: Arc<dyn LLMClient>,
    pub citation: Arc<dyn LLMClient>,
}

impl AgentClients {
    /// Build rate-limited Anthropic clients for each role.
    ///
    /// All three share one HTTP connection pool and the LLM token bucket.
    pub fn from_config(config: &ResearchConfig, limiters: &RateLimiters) -> Result<Self> {
        let api_key = config.anthropic_api_key()?;
        let http = AnthropicClient::build_http(Duration::from_secs(config.anthropic.timeout_secs))?;
        let retry = RetryPolicy::from_config(&config.retry);

        let build = |model: &str| -> Arc<dyn LLMClient> {
            let inner = AnthropicClient::with_http(
                http.clone(),
                api_key.clone(),
                config.anthropic.base_url.clone(),
                model.to_string(),
            );
            Arc::new(RateLimitedClient::new(
                Box::new(inner),
                Arc::clone(&limiters.llm),
                retry,
            ))
        };

        Ok(Self {
            lead: build(&config.models.lead),
            subagent: build(&config.models.subagent),
            citation: build(&config.models.citation),
        })
    }

    /// Use one client for every role (tests, single-model setups)
    pub fn uniform(client: Arc<dyn LLMClient>) -> Self {
        Self {
            lead: Arc::clone(&client),
            subagent: Arc::clone(&client),
            citation: client,
        }
    }
}
