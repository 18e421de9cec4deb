//! deep-research CLI entry point
//!
//! - `deep-research` - Interactive prompt (default)
//! - `deep-research run <query>` - Research one query
//! - `deep-research serve` - HTTP API
//! - `deep-research reports list|show` - Browse stored reports
//! - `deep-research config` - Show or validate configuration

use anyhow::Context;
use deep_research::{
    AgentClients, AppState, ConfigManager, ResearchStore, ResearchWorkflow, RunOptions,
    ToolRegistry,
    api::create_router,
    cli::{Cli, Commands, ReportCommands, output::Output},
    utils::{rate_limiter::RateLimiters, toml_config::ResearchConfig},
};
use owo_colors::OwoColorize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    if let Err(e) = run(cli, &output).await {
        if output.colored {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli, output: &Output) -> anyhow::Result<()> {
    let config_manager = Arc::new(
        ConfigManager::new(&cli.config)
            .with_context(|| format!("loading configuration from {}", cli.config.display()))?,
    );
    init_tracing(&config_manager.config(), cli.verbose)?;

    match cli.command {
        None | Some(Commands::Interactive) => run_interactive(config_manager, output).await,
        Some(Commands::Run {
            query,
            max_iterations,
            concurrency,
            no_save,
        }) => {
            let query = Cli::join_query(&query);
            let options = RunOptions {
                max_iterations,
                max_concurrent_subagents: concurrency,
                persist: !no_save,
                events: None,
            };
            run_query(config_manager, &query, options, output).await
        }
        Some(Commands::Serve { host, port, watch }) => {
            serve(config_manager, host, port, watch).await
        }
        Some(Commands::Reports(command)) => run_reports(config_manager, command, output).await,
        Some(Commands::Config { validate }) => {
            show_config(&config_manager, validate, output);
            Ok(())
        }
    }
}

fn init_tracing(config: &ResearchConfig, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        "debug"
    } else {
        config.server.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("deep_research={},tower_http={}", level, level)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.server.log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}

/// Open the store and wire clients, tools and the workflow from configuration
async fn build_workflow(
    config_manager: Arc<ConfigManager>,
) -> anyhow::Result<(Arc<ResearchStore>, ResearchWorkflow)> {
    let config = config_manager.config();
    let limiters = RateLimiters::from_config(&config.rate_limits);

    let store = Arc::new(
        ResearchStore::new_local(&config.database.path)
            .await
            .with_context(|| format!("opening database {}", config.database.path.display()))?,
    );
    let clients = AgentClients::from_config(&config, &limiters)?;
    let tools = ToolRegistry::with_default_tools(&limiters, Some(Arc::clone(&store)));

    let workflow =
        ResearchWorkflow::new(config_manager, clients, tools).with_store(Arc::clone(&store));
    Ok((store, workflow))
}

async fn run_query(
    config_manager: Arc<ConfigManager>,
    query: &str,
    options: RunOptions,
    output: &Output,
) -> anyhow::Result<()> {
    let (_store, workflow) = build_workflow(config_manager).await?;
    research_once(&workflow, query, options, output).await
}

async fn research_once(
    workflow: &ResearchWorkflow,
    query: &str,
    mut options: RunOptions,
    output: &Output,
) -> anyhow::Result<()> {
    output.header(&format!("Researching: {}", query));

    let (tx, mut rx) = mpsc::unbounded_channel();
    options.events = Some(tx);

    let research = workflow.run_research(query, options);
    tokio::pin!(research);

    let report = loop {
        tokio::select! {
            result = &mut research => break result?,
            Some(event) = rx.recv() => output.event(&event),
        }
    };
    while let Ok(event) = rx.try_recv() {
        output.event(&event);
    }

    output.report(report.best_text(), &report.sources, &report.metrics);
    if let Some(id) = &report.report_id {
        output.success(&format!("Saved as report {}", id));
    }
    Ok(())
}

async fn run_interactive(config_manager: Arc<ConfigManager>, output: &Output) -> anyhow::Result<()> {
    let (_store, workflow) = build_workflow(config_manager).await?;

    output.banner();
    println!("  Type a research question. 'exit', 'quit' or 'q' to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(query) = next_query(&mut lines, &mut stdout).await? {
        if let Err(e) = research_once(&workflow, &query, RunOptions::default(), output).await {
            output.error(&e.to_string());
        }
    }

    Ok(())
}

/// Prompt until a non-blank line arrives. `None` on EOF or an exit command.
async fn next_query<R, W>(lines: &mut Lines<R>, prompt: &mut W) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        prompt.write_all(b"\n> ").await?;
        prompt.flush().await?;

        let Some(line) = lines.next_line().await? else {
            return Ok(None);
        };

        match line.trim() {
            "" => continue,
            "exit" | "quit" | "q" => return Ok(None),
            query => return Ok(Some(query.to_string())),
        }
    }
}

async fn serve(
    config_manager: Arc<ConfigManager>,
    host: Option<String>,
    port: Option<u16>,
    watch: bool,
) -> anyhow::Result<()> {
    let config = config_manager.config();
    let api_key = config.server_api_key()?;
    if api_key.is_none() {
        tracing::warn!("No API key configured; /api routes are open");
    }

    if watch {
        config_manager.start_watching()?;
    }

    let (store, workflow) = build_workflow(Arc::clone(&config_manager)).await?;
    let state = AppState {
        config_manager,
        store,
        workflow: Arc::new(workflow),
        api_key,
    };
    let app = create_router(state);

    let addr = format!(
        "{}:{}",
        host.unwrap_or_else(|| config.server.host.clone()),
        port.unwrap_or(config.server.port)
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    tracing::info!("Listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_reports(
    config_manager: Arc<ConfigManager>,
    command: ReportCommands,
    output: &Output,
) -> anyhow::Result<()> {
    let config = config_manager.config();
    let store = ResearchStore::new_local(&config.database.path).await?;

    match command {
        ReportCommands::List { limit } => {
            let reports = store.list_recent_reports(limit).await?;
            if reports.is_empty() {
                output.info("No reports stored yet");
                return Ok(());
            }

            output.header("Recent reports");
            output.table_header(&["Created", "ID", "Query"]);
            for report in &reports {
                let created = report.created_at.format("%Y-%m-%d %H:%M").to_string();
                output.table_row(&[created.as_str(), report.id.as_str(), report.query.as_str()]);
            }
        }
        ReportCommands::Show { id } => {
            let report = store
                .get_research_report(&id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("report {} not found", id))?;

            output.header(&report.query);
            let text = if report.cited_report.trim().is_empty() {
                &report.report
            } else {
                &report.cited_report
            };
            output.report(text, &report.sources, &report.metrics);
        }
    }
    Ok(())
}

fn show_config(config_manager: &ConfigManager, validate: bool, output: &Output) {
    let config = config_manager.config();
    let path = config_manager.path().display().to_string();

    if validate {
        output.success(&format!("Configuration is valid ({})", path));
        match config.anthropic_api_key() {
            Ok(_) => output.success(&format!("{} is set", config.anthropic.api_key_env)),
            Err(e) => output.warning(&e.to_string()),
        }
        return;
    }

    output.header("Configuration");
    output.kv("file", &path);
    output.kv(
        "server",
        &format!("{}:{}", config.server.host, config.server.port),
    );
    output.kv("database", &config.database.path.display().to_string());

    output.header("Models");
    output.kv("lead", &config.models.lead);
    output.kv("subagent", &config.models.subagent);
    output.kv("citation", &config.models.citation);

    let research = &config.research;
    output.header("Research");
    output.kv("max iterations", &research.max_iterations.to_string());
    output.kv(
        "concurrent subagents",
        &research.max_concurrent_subagents.to_string(),
    );
    output.kv("subagents per plan", &research.max_subagents_per_plan.to_string());
    output.kv(
        "subagent timeout",
        &format!("{}s", research.subagent_timeout_secs),
    );

    output.hint("Environment variables override file values; see research.example.toml");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_next_query_skips_blanks_and_stops_on_exit() {
        let input: &[u8] = b"  \n  first question \n\nsecond\nquit\nnever read\n";
        let mut lines = BufReader::new(input).lines();
        let mut prompt = Vec::new();

        let mut queries = Vec::new();
        while let Some(query) = next_query(&mut lines, &mut prompt).await.unwrap() {
            queries.push(query);
        }

        assert_eq!(queries, vec!["first question", "second"]);
        assert_eq!(String::from_utf8(prompt).unwrap().matches("> ").count(), 5);
    }

    #[tokio::test]
    async fn test_next_query_ends_at_eof() {
        let input: &[u8] = b"only\n";
        let mut lines = BufReader::new(input).lines();
        let mut prompt = Vec::new();

        assert_eq!(
            next_query(&mut lines, &mut prompt).await.unwrap().as_deref(),
            Some("only")
        );
        assert!(next_query(&mut lines, &mut prompt).await.unwrap().is_none());
    }
}
