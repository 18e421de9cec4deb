//! Prompt templates for the lead, subagent and citation roles

use crate::types::{Finding, QueryAnalysis, QueryType, Source};
use crate::utils::json::truncate_chars;

pub fn analyze_query(query: &str) -> String {
    format!(
        r#"Analyze this research query and determine its type and complexity.

Query: {query}

Classify the query type as one of:
- "depth-first": needs multiple perspectives on the same issue
- "breadth-first": splits into distinct, independent sub-questions
- "straightforward": focused and well defined, one investigation is enough

Classify the complexity as one of:
- "simple": 1 subagent, basic fact-finding
- "standard": 2-3 subagents, a few perspectives
- "medium": 3-5 subagents, multi-faceted
- "high": 5-20 subagents, very broad with many components

Respond in JSON format:
{{
    "query_type": "...",
    "complexity": "...",
    "reasoning": "..."
}}"#
    )
}

fn query_type_guidance(query_type: QueryType) -> &'static str {
    match query_type {
        QueryType::DepthFirst => {
            "- Each task explores the core question from a different angle or methodology\n\
             - Prefer depth over breadth"
        }
        QueryType::BreadthFirst => {
            "- Split the query into distinct, independent sub-topics\n\
             - Give every task a clear boundary so tasks don't overlap"
        }
        QueryType::Straightforward => {
            "- Keep tasks focused on direct information gathering\n\
             - Add a verification task if facts need cross-checking"
        }
    }
}

pub fn create_plan(query: &str, analysis: &QueryAnalysis, subagent_count: usize) -> String {
    format!(
        r#"Create a detailed research plan for this query.

Query: {query}
Query Type: {query_type}
Complexity: {complexity}
Suggested Subagents: {subagent_count}

Create {subagent_count} specific research tasks. Each task needs:
- A clear, specific objective
- Suggested search queries
- The expected output

Guidance for {query_type} queries:
{guidance}

Respond in JSON format:
{{
    "subagent_count": {subagent_count},
    "tasks": [
        {{
            "description": "Specific research task description",
            "search_queries": ["query1", "query2"],
            "expected_output": "What this task should produce",
            "tools": ["web_search", "web_fetch"]
        }}
    ],
    "synthesis_approach": "How to combine the results"
}}"#,
        query_type = analysis.query_type,
        complexity = analysis.complexity,
        guidance = query_type_guidance(analysis.query_type),
    )
}

/// Numbered one-line summaries of the first ten findings
pub fn summarize_findings(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return "No results found yet.".to_string();
    }

    findings
        .iter()
        .take(10)
        .enumerate()
        .map(|(i, f)| {
            let title = if f.title.is_empty() { "Untitled" } else { &f.title };
            format!("{}. {}: {}...", i + 1, title, truncate_chars(&f.content, 200))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn evaluate_completeness(query: &str, findings: &[Finding], iteration: u32) -> String {
    format!(
        r#"Evaluate whether the research results are sufficient to answer the query.

Original Query: {query}
Current Iteration: {iteration}
Results Found: {count} items

Results Summary:
{summary}

Consider:
1. Does the information fully answer the query?
2. Are important gaps or perspectives missing?
3. Is the information credible and well sourced?

Respond in JSON format:
{{
    "is_complete": true/false,
    "needs_more": true/false,
    "completeness_score": 0.0-1.0,
    "missing_aspects": ["aspect1", "aspect2"],
    "additional_tasks": [
        {{
            "description": "Additional research needed",
            "search_queries": ["query"],
            "tools": ["web_search"]
        }}
    ]
}}"#,
        count = findings.len(),
        summary = summarize_findings(findings),
    )
}

/// Findings rendered as numbered sources, at most `limit` of them
pub fn format_findings_for_synthesis(findings: &[Finding], limit: usize) -> String {
    findings
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, f)| {
            let source = if f.url.is_empty() {
                format!("Source {}", i + 1)
            } else {
                f.url.clone()
            };
            format!(
                "Source {}: {}\nTitle: {}\nContent: {}\n---",
                i + 1,
                source,
                f.title,
                f.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn synthesize(query: &str, synthesis_approach: &str, formatted_findings: &str) -> String {
    let approach = if synthesis_approach.trim().is_empty() {
        "Combine all findings"
    } else {
        synthesis_approach
    };

    format!(
        r#"Synthesize the research results into a comprehensive report.

Original Query: {query}
Synthesis Approach: {approach}

Research Results:
{formatted_findings}

Write a well-structured report that:
1. Directly answers the query
2. Integrates information from all sources
3. Highlights key findings and insights
4. Stays factually accurate
5. Gives a balanced perspective

Format the report in markdown with clear sections.
Do not include citations in the text, they are added later.

After the report, list the sources you used as a JSON array of objects with "title" and "url"."#
    )
}

pub fn subagent_plan(task: &str, tools: &[String], budget: usize) -> String {
    format!(
        r#"Plan how to research this task efficiently.

Task: {task}
Available tools: {tools}
Tool budget: {budget} calls

List:
1. Key information to find
2. Search strategies
3. Sources to prioritize

Be concise and focused."#,
        tools = tools.join(", "),
    )
}

pub fn subagent_summary(task: &str, findings_json: &str) -> String {
    format!(
        r#"Summarize these research findings for the task.

Task: {task}

Findings:
{findings_json}

Write a concise summary of the key information found."#
    )
}

pub fn format_sources(sources: &[Source]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let title = if s.title.is_empty() { "Untitled" } else { &s.title };
            format!("[{}] {}\n    URL: {}", i + 1, title, s.url)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn add_citations(text: &str, sources: &[Source]) -> String {
    format!(
        r#"Add citations to this research report.

<synthesized_text>
{text}
</synthesized_text>

<sources>
{sources}
</sources>

Rules:
- Use the format [1], [2], etc.
- Put citations at the end of sentences or claims that use information from that source
- Only cite where the source directly supports the claim
- Avoid over-citation, not every sentence needs one
- Focus on key facts, data and specific claims
- Do NOT change the text, only add citation markers

Return ONLY the text with citations added, with no preamble or explanation."#,
        sources = format_sources(sources),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FindingOrigin, QueryComplexity};

    fn finding(title: &str, content: &str, url: &str) -> Finding {
        Finding {
            title: title.to_string(),
            content: content.to_string(),
            url: url.to_string(),
            origin: FindingOrigin::WebSearch,
        }
    }

    #[test]
    fn test_summarize_caps_count_and_length() {
        let long = "x".repeat(500);
        let findings: Vec<Finding> = (0..15).map(|i| finding(&format!("t{}", i), &long, "")).collect();

        let summary = summarize_findings(&findings);
        assert_eq!(summary.lines().count(), 10);
        assert!(summary.starts_with("1. t0: "));
        assert_eq!(summary.lines().next().unwrap().matches('x').count(), 200);
    }

    #[test]
    fn test_summarize_empty() {
        assert_eq!(summarize_findings(&[]), "No results found yet.");
    }

    #[test]
    fn test_synthesis_format_limits_sources() {
        let findings: Vec<Finding> = (0..60)
            .map(|i| finding("t", "c", &format!("https://e.com/{}", i)))
            .collect();
        let formatted = format_findings_for_synthesis(&findings, 50);
        assert!(formatted.contains("Source 50: https://e.com/49"));
        assert!(!formatted.contains("Source 51"));
    }

    #[test]
    fn test_plan_prompt_mentions_count_and_guidance() {
        let analysis = QueryAnalysis {
            query_type: QueryType::BreadthFirst,
            complexity: QueryComplexity::Standard,
            reasoning: String::new(),
        };
        let prompt = create_plan("q", &analysis, 3);
        assert!(prompt.contains("Create 3 specific research tasks"));
        assert!(prompt.contains("independent sub-topics"));
    }

    #[test]
    fn test_format_sources() {
        let sources = vec![
            Source {
                title: "A".into(),
                url: "https://a".into(),
            },
            Source {
                title: String::new(),
                url: String::new(),
            },
        ];
        assert_eq!(
            format_sources(&sources),
            "[1] A\n    URL: https://a\n\n[2] Untitled\n    URL: "
        );
    }
}
