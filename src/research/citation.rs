//! Citation stage: inserts `[n]` markers into a report and appends references

use crate::llm::{GenerationParams, LLMClient};
use crate::research::prompts;
use crate::types::{CitationVerification, Result, Source};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

const REFERENCES_HEADING: &str = "## References";
const MAX_CITATION_TOKENS: usize = 16_000;

static CITATION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d+)\]").expect("citation marker pattern is valid")
});

static WRAPPER_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?(exact_text_with_citations?|synthesized_text)>")
        .expect("wrapper tag pattern is valid")
});

static REFERENCE_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^#{1,6}[ \t]*(references|sources|bibliography)[ \t]*:?[ \t]*$")
        .expect("reference heading pattern is valid")
});

pub struct CitationAgent {
    client: Arc<dyn LLMClient>,
    tokens_used: AtomicU64,
}

impl CitationAgent {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            tokens_used: AtomicU64::new(0),
        }
    }

    pub fn tokens_used(&self) -> u64 {
        self.tokens_used.load(Ordering::Relaxed)
    }

    /// Ask the model to place citation markers, then append the reference list.
    /// Without sources the text is returned untouched.
    pub async fn add_citations(&self, text: &str, sources: &[Source]) -> Result<String> {
        if sources.is_empty() {
            warn!("No sources provided for citations");
            return Ok(text.to_string());
        }

        info!(
            "Adding citations ({} chars, {} sources)",
            text.len(),
            sources.len()
        );

        let max_tokens = (text.chars().count() + 500).min(MAX_CITATION_TOKENS) as u32;
        let response = self
            .client
            .generate_with_params(
                &prompts::add_citations(text, sources),
                &GenerationParams::new(0.2, max_tokens),
            )
            .await?;
        self.tokens_used
            .fetch_add(response.usage.total(), Ordering::Relaxed);

        let cited = clean_cited_text(&response.content);
        Ok(append_references(&cited, sources))
    }
}

/// Strip wrapper tags, a leading "Here is the text with citations" preamble
/// and any reference list the model wrote itself
pub fn clean_cited_text(text: &str) -> String {
    let text = WRAPPER_TAGS.replace_all(text, "");

    let text = if text.contains("Here is the text with citations") {
        let mut parts = text.splitn(3, '\n');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(_), Some(rest)) => rest.to_string(),
            _ => text.to_string(),
        }
    } else {
        text.to_string()
    };

    strip_trailing_references(&text).trim().to_string()
}

/// Drop a final references section; one followed by further headings is kept
fn strip_trailing_references(text: &str) -> &str {
    let Some(heading) = REFERENCE_SECTION.find_iter(text).last() else {
        return text;
    };
    let after = &text[heading.end()..];
    if after.lines().any(|line| line.trim_start().starts_with('#')) {
        return text;
    }
    &text[..heading.start()]
}

pub fn append_references(text: &str, sources: &[Source]) -> String {
    if sources.is_empty() {
        return text.to_string();
    }

    let references: Vec<String> = sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let title = if source.title.is_empty() {
                "Untitled"
            } else {
                &source.title
            };
            if source.url.is_empty() {
                format!("[{}] {}", i + 1, title)
            } else {
                format!("[{}] {}. Available at: {}", i + 1, title, source.url)
            }
        })
        .collect();

    format!("{}\n\n{}\n{}", text, REFERENCES_HEADING, references.join("\n"))
}

/// Count citation markers in the report body (the reference list is excluded)
pub fn verify_citations(cited_text: &str, sources: &[Source]) -> CitationVerification {
    let body = cited_text
        .rfind(REFERENCES_HEADING)
        .map_or(cited_text, |idx| &cited_text[..idx]);

    let markers: Vec<usize> = CITATION_MARKER
        .captures_iter(body)
        .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse().ok()))
        .collect();
    let unique: HashSet<usize> = markers.iter().copied().collect();

    let uncited_sources = (1..=sources.len())
        .filter(|i| !unique.contains(i))
        .collect::<Vec<_>>();

    let words = body.split_whitespace().count().max(1);

    let verification = CitationVerification {
        total_citations: markers.len(),
        unique_citations: unique.len(),
        total_sources: sources.len(),
        uncited_sources,
        citation_density: markers.len() as f64 / words as f64,
    };

    info!(
        "Citation verification: {} citations, {} unique, {} uncited sources",
        verification.total_citations,
        verification.unique_citations,
        verification.uncited_sources.len()
    );
    verification
}
