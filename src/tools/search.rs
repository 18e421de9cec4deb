//! Web search and page fetch tools
//!
//! Search goes through daedra (DuckDuckGo backend). Pages are fetched with
//! reqwest and reduced to readable text with scraper.

use crate::tools::registry::Tool;
use crate::types::{AppError, Result};
use crate::utils::json::truncate_chars;
use crate::utils::rate_limiter::TokenBucket;
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Maximum characters of page text returned by `web_fetch`
pub const MAX_PAGE_CHARS: usize = 10_000;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "Mozilla/5.0 (compatible; deep-research/0.1)";

/// Web search tool powered by daedra
pub struct WebSearchTool {
    bucket: Arc<TokenBucket>,
}

impl WebSearchTool {
    pub fn new(bucket: Arc<TokenBucket>) -> Self {
        Self { bucket }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information using DuckDuckGo"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results to return (default: 10)",
                    "default": 10
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| AppError::InvalidInput("Missing 'query' parameter".to_string()))?;

        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(10);

        self.bucket.acquire(1).await?;
        debug!(query, max_results, "web_search");

        let search_args = daedra::SearchArgs {
            query: query.to_string(),
            options: Some(daedra::SearchOptions {
                num_results: max_results,
                ..Default::default()
            }),
        };

        let response = daedra::tools::search::perform_search(&search_args)
            .await
            .map_err(|e| AppError::Tool(format!("Search failed: {}", e)))?;

        let results: Vec<Value> = response
            .data
            .iter()
            .take(max_results)
            .map(|r| {
                json!({
                    "title": r.title,
                    "snippet": r.description,
                    "url": r.url
                })
            })
            .collect();

        Ok(json!({
            "query": query,
            "count": results.len(),
            "results": results
        }))
    }
}

/// Page fetch tool returning the visible text of a page
pub struct WebFetchTool {
    bucket: Arc<TokenBucket>,
    http: reqwest::Client,
}

impl WebFetchTool {
    pub fn new(bucket: Arc<TokenBucket>) -> Self {
        Self {
            bucket,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its title and text content"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The http(s) URL of the page to fetch"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::InvalidInput("Missing 'url' parameter".to_string()))?;

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AppError::InvalidInput(format!(
                "URL must start with http:// or https://: {}",
                url
            )));
        }

        self.bucket.acquire(1).await?;
        debug!(url, "web_fetch");

        let response = self
            .http
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| AppError::Tool(format!("Failed to fetch {}: {}", url, e)))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(AppError::Tool(format!(
                "Fetching {} returned HTTP {}",
                url,
                status.as_u16()
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| AppError::Tool(format!("Failed to read {}: {}", url, e)))?;

        let page = extract_page_text(&html);

        Ok(json!({
            "url": url,
            "title": page.title.unwrap_or_else(|| "No title".to_string()),
            "content": truncate_chars(&page.text, MAX_PAGE_CHARS),
            "status": status.as_u16()
        }))
    }
}

#[derive(Debug, PartialEq)]
pub struct PageText {
    pub title: Option<String>,
    pub text: String,
}

/// Reduce an HTML document to its title and visible text.
///
/// Script, style and noscript contents are dropped. Each text node has its
/// whitespace collapsed and non-empty nodes are joined by newlines.
pub fn extract_page_text(html: &str) -> PageText {
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        })
        .filter(|t| !t.is_empty());

    let mut lines = Vec::new();
    for node in document.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| matches!(el.name(), "script" | "style" | "noscript"))
        });
        if hidden {
            continue;
        }
        let line = collapse_whitespace(text);
        if !line.is_empty() {
            lines.push(line);
        }
    }

    PageText {
        title,
        text: lines.join("\n"),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
