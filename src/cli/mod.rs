//! CLI module for deep-research
//!
//! Command-line parsing for the `deep-research` binary. Uses clap for
//! arguments and owo-colors for terminal output.

pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// deep-research - multi-agent research from the terminal
#[derive(Parser, Debug)]
#[command(
    name = "deep-research",
    author = "Dirmacs <build@dirmacs.com>",
    version,
    about = "Multi-agent deep research pipeline",
    long_about = "A lead agent plans research tasks, parallel subagents search and read the web,\n\
                  and the findings are synthesized into a cited report.\n\n\
                  Run without arguments for an interactive prompt.",
    after_help = "EXAMPLES:\n    \
                  deep-research run \"What changed in HTTP/3?\"   # Research one query\n    \
                  deep-research run --max-iterations 2 rust async  # Fewer evaluation rounds\n    \
                  deep-research serve --port 8080                  # Start the HTTP API\n    \
                  deep-research reports list                       # Recent stored reports"
)]
pub struct Cli {
    /// Path to the configuration file (optional; defaults apply when missing)
    #[arg(short, long, default_value = "research.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Research a single query and print the report
    Run {
        /// The research question
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Maximum evaluate-and-dispatch rounds
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Maximum subagents running at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Do not persist the plan, results or report
        #[arg(long)]
        no_save: bool,
    },

    /// Interactive prompt: one research run per line
    Interactive,

    /// Start the HTTP API server
    Serve {
        /// Host address (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Reload the configuration file when it changes
        #[arg(long)]
        watch: bool,
    },

    /// Browse stored reports
    #[command(subcommand)]
    Reports(ReportCommands),

    /// Show configuration information
    Config {
        /// Only validate the configuration
        #[arg(long)]
        validate: bool,
    },
}

/// Report browsing subcommands
#[derive(Subcommand, Debug)]
pub enum ReportCommands {
    /// List recent reports
    List {
        /// Number of reports to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Print a stored report
    Show {
        /// Report ID
        id: String,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The query words joined back into one string
    pub fn join_query(words: &[String]) -> String {
        words.join(" ").trim().to_string()
    }
}
