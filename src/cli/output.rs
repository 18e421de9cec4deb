//! Colored output helpers for the CLI

use crate::research::{Stage, WorkflowEvent};
use crate::types::{ResearchMetrics, Source};
use owo_colors::OwoColorize;

/// Output style configuration
pub struct Output {
    /// Whether to use colored output
    pub colored: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    pub fn new() -> Self {
        Self { colored: true }
    }

    pub fn no_color() -> Self {
        Self { colored: false }
    }

    pub fn banner(&self) {
        let version = format!("v{}", env!("CARGO_PKG_VERSION"));
        if self.colored {
            println!(
                "\n   {} {}",
                "deep-research".bright_cyan().bold(),
                version.dimmed()
            );
            println!("   {}\n", "lead planner, parallel subagents, cited reports".dimmed());
        } else {
            println!("\n   deep-research {}\n", version);
        }
    }

    pub fn success(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "✓".green().bold(), message.green());
        } else {
            println!("  [OK] {}", message);
        }
    }

    pub fn info(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "•".blue(), message);
        } else {
            println!("  [INFO] {}", message);
        }
    }

    pub fn warning(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "⚠".yellow().bold(), message.yellow());
        } else {
            println!("  [WARN] {}", message);
        }
    }

    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("  [ERROR] {}", message);
        }
    }

    pub fn header(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.bright_white().bold().underline());
        } else {
            println!("\n  === {} ===", title);
        }
    }

    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("    {}: {}", key.dimmed(), value.bright_white());
        } else {
            println!("    {}: {}", key, value);
        }
    }

    pub fn hint(&self, message: &str) {
        if self.colored {
            println!("\n  {}", message.dimmed().italic());
        } else {
            println!("\n  [TIP] {}", message);
        }
    }

    pub fn table_header(&self, columns: &[&str]) {
        let header = pad_columns(columns);
        if self.colored {
            println!("    {}", header.bright_white().bold());
            println!("    {}", "─".repeat(columns.len() * 16).dimmed());
        } else {
            println!("    {}", header);
            println!("    {}", "-".repeat(columns.len() * 16));
        }
    }

    pub fn table_row(&self, values: &[&str]) {
        println!("    {}", pad_columns(values));
    }

    /// One progress line per workflow event
    pub fn event(&self, event: &WorkflowEvent) {
        match event {
            WorkflowEvent::StageStarted { stage, .. } => self.stage(*stage),
            WorkflowEvent::PlanCreated { tasks } => {
                self.info(&format!("Planned {} research tasks", tasks))
            }
            WorkflowEvent::SubagentFinished {
                agent_id,
                success,
                findings,
            } => {
                let line = format!("subagent {}: {} findings", agent_id, findings);
                if *success {
                    self.success(&line);
                } else {
                    self.warning(&format!("{} (failed)", line));
                }
            }
            WorkflowEvent::Evaluated {
                iteration,
                completeness_score,
                needs_more,
            } => self.info(&format!(
                "Iteration {}: completeness {:.2}{}",
                iteration,
                completeness_score,
                if *needs_more { ", researching further" } else { "" }
            )),
            WorkflowEvent::Completed { .. } => {}
        }
    }

    fn stage(&self, stage: Stage) {
        if self.colored {
            println!("  {} {}", "▸".cyan().bold(), stage.as_str().bright_white());
        } else {
            println!("  > {}", stage);
        }
    }

    /// Print a finished report with its sources and metrics
    pub fn report(&self, text: &str, sources: &[Source], metrics: &ResearchMetrics) {
        println!("\n{}\n", text);

        if !sources.is_empty() && !text.contains("## References") {
            self.header("Sources");
            for (i, source) in sources.iter().enumerate() {
                println!("    [{}] {} {}", i + 1, source.title, source.url);
            }
        }

        self.header("Metrics");
        self.kv("iterations", &metrics.iterations.to_string());
        self.kv(
            "subagents",
            &format!(
                "{} completed, {} failed",
                metrics.subagents_completed, metrics.subagents_failed
            ),
        );
        self.kv("sources", &metrics.sources.to_string());
        self.kv("tokens", &metrics.total_tokens.to_string());
        self.kv("time", &format!("{:.1}s", metrics.execution_time_secs));
        println!();
    }
}

fn pad_columns(values: &[&str]) -> String {
    values
        .iter()
        .map(|v| format!("{:<15}", v))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_modes() {
        assert!(Output::new().colored);
        assert!(!Output::no_color().colored);
        assert!(Output::default().colored);
    }

    #[test]
    fn test_pad_columns() {
        assert_eq!(pad_columns(&["a", "b"]), format!("{:<15} {:<15}", "a", "b"));
        assert_eq!(pad_columns(&[]), "");
    }

    #[test]
    fn test_output_methods_no_panic() {
        for output in [Output::new(), Output::no_color()] {
            output.banner();
            output.success("ok");
            output.info("info");
            output.warning("warn");
            output.error("error");
            output.header("Header");
            output.kv("key", "value");
            output.hint("hint");
            output.table_header(&["ID", "Query"]);
            output.table_row(&["1", "what is rust"]);
            output.event(&WorkflowEvent::PlanCreated { tasks: 3 });
            output.event(&WorkflowEvent::SubagentFinished {
                agent_id: "ab12cd34".into(),
                success: false,
                findings: 0,
            });
            output.report(
                "Body",
                &[Source {
                    title: "T".into(),
                    url: "https://t".into(),
                }],
                &ResearchMetrics::default(),
            );
        }
    }
}
