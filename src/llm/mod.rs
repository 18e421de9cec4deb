//! LLM access for the research agents
//!
//! - [`client`]: the [`LLMClient`] trait, request parameters and per-role clients
//! - [`anthropic`]: Anthropic Messages API implementation
//! - [`limited`]: token-bucket and retry decorator

pub mod anthropic;
pub mod client;
pub mod limited;

pub use client::{AgentClients, GenerationParams, LLMClient, LLMResponse, Provider, TokenUsage};
