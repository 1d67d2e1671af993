//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use research_core::{
    Collaborators, ContentProvider, EngineOptions, ProcessingEngine, RunResults,
    UnavailableSources,
};
use research_shared::{
    AppConfig, TestResult, init_config, load_config, load_config_from, validate_api_key,
};
use research_sources::SourceManager;
use research_storage::Storage;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::progress::RunProgress;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// research: summarize newsletters, feeds and web pages into a research log.
#[derive(Parser)]
#[command(
    name = "research",
    version,
    about = "Fetch, summarize and store research content from email, RSS and the web.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Settings file (defaults to $RESEARCH_CONFIG or ~/.research-pipeline/research.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the full processing workflow once.
    Run {
        /// Print the step results as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Manage content sources.
    Sources {
        #[command(subcommand)]
        action: SourcesAction,
    },

    /// Weekly roll-up helpers.
    Weekly {
        #[command(subcommand)]
        action: WeeklyAction,
    },

    /// Check sources, the LLM API, link enrichment and the database.
    TestConfig {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show database statistics and recent summaries.
    Stats {
        /// Number of recent summaries to list.
        #[arg(long, default_value = "5")]
        recent: u32,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Source management subcommands.
#[derive(Subcommand)]
pub(crate) enum SourcesAction {
    /// List configured sources.
    List,
    /// Show one source with plugin details.
    Show { id: String },
    /// Add (or replace) a source.
    Add {
        id: String,

        /// Plugin type: email, rss or web.
        #[arg(long = "type")]
        plugin_type: String,

        /// Display name.
        #[arg(long)]
        name: Option<String>,

        /// Add the source disabled.
        #[arg(long)]
        disabled: bool,

        /// Plugin config as a JSON object.
        #[arg(long, default_value = "{}")]
        config: String,
    },
    /// Remove a source.
    Remove { id: String },
    /// Enable a source.
    Enable { id: String },
    /// Disable a source.
    Disable { id: String },
    /// Test one source, or all of them.
    Test { id: Option<String> },
    /// Validate a plugin config without saving it.
    Validate {
        #[arg(long = "type")]
        plugin_type: String,

        #[arg(long, default_value = "{}")]
        config: String,
    },
    /// List registered plugin types.
    Types,
}

/// Weekly roll-up subcommands.
#[derive(Subcommand)]
pub(crate) enum WeeklyAction {
    /// Show whether the next run would generate a weekly summary.
    Status,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "research=info",
        1 => "research=debug",
        _ => "research=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    let settings = || load_settings(config_path.as_deref()).map(Arc::new);

    match cli.command {
        Command::Run { json } => cmd_run(settings()?, json).await,
        Command::Sources { action } => cmd_sources(settings()?, action).await,
        Command::Weekly {
            action: WeeklyAction::Status,
        } => cmd_weekly_status(settings()?).await,
        Command::TestConfig { json } => cmd_test_config(settings()?, json).await,
        Command::Stats { recent } => cmd_stats(&*settings()?, recent).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path.as_deref()),
            ConfigAction::Show => cmd_config_show(&*settings()?),
        },
    }
}

fn load_settings(path: Option<&Path>) -> Result<AppConfig> {
    let settings = match path {
        Some(path) => {
            let mut settings = load_config_from(path)?;
            settings.apply_env_fallbacks();
            settings
        }
        None => load_config()?,
    };
    Ok(settings)
}

/// Engine over the production collaborators. A source manager that fails
/// to load leaves runs on the legacy clients.
async fn build_engine(settings: &Arc<AppConfig>) -> Result<ProcessingEngine> {
    let sources: Arc<dyn ContentProvider> = match SourceManager::load(settings.clone()).await {
        Ok(manager) => Arc::new(manager),
        Err(e) => {
            warn!(error = %e, "source manager unavailable, using legacy clients");
            Arc::new(UnavailableSources::new(e))
        }
    };
    let collaborators = Collaborators::from_settings(settings, sources).await?;
    Ok(ProcessingEngine::new(
        collaborators,
        EngineOptions::from_settings(settings),
    ))
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(settings: Arc<AppConfig>, json: bool) -> Result<()> {
    if let Err(e) = validate_api_key(&settings) {
        warn!(error = %e, "summaries will be placeholders until an API key is set");
    }

    let engine = build_engine(&settings).await?;
    let cancel = engine.cancellation_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    info!("starting processing run");
    let started = Instant::now();
    let progress = (!json).then(|| RunProgress::attach(engine.subscribe()));
    let outcome = engine.run_full_processing().await;
    if let Some(progress) = progress {
        progress.finish().await;
    }
    let results = outcome?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    println!();
    println!("  Processing complete!");
    println!("  Content:    {}", count(&results, "content_fetched"));
    println!("  Links:      {}", count(&results, "links_processed"));
    println!("  Summaries:  {}", count(&results, "summaries_generated"));
    println!("  Insights:   {}", count(&results, "insights_extracted"));
    println!("  Exports:    {}", count(&results, "exports_generated"));
    if let Some(Value::Array(files)) = results.get("export_files") {
        for file in files.iter().filter_map(Value::as_str) {
            println!("              {file}");
        }
    }
    let weekly = results
        .get("weekly_summary_generated")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    println!("  Weekly:     {}", if weekly { "generated" } else { "not due" });
    println!("  Time:       {:.1}s", started.elapsed().as_secs_f64());
    println!();

    Ok(())
}

fn count(results: &RunResults, key: &str) -> u64 {
    results.get(key).and_then(Value::as_u64).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// sources
// ---------------------------------------------------------------------------

async fn cmd_sources(settings: Arc<AppConfig>, action: SourcesAction) -> Result<()> {
    let manager = SourceManager::load(settings).await?;

    match action {
        SourcesAction::List => {
            let sources = manager.get_configured_sources().await;
            if sources.is_empty() {
                println!("No sources configured.");
                return Ok(());
            }
            println!("{:<24} {:<8} {:<9} NAME", "ID", "TYPE", "ENABLED");
            for source in sources {
                println!(
                    "{:<24} {:<8} {:<9} {}",
                    source.source_id,
                    source.plugin_type,
                    if source.enabled { "yes" } else { "no" },
                    source.name
                );
            }
        }
        SourcesAction::Show { id } => {
            let info = manager
                .get_source_info(&id)
                .await
                .ok_or_else(|| eyre!("source '{id}' not found"))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        SourcesAction::Add {
            id,
            plugin_type,
            name,
            disabled,
            config,
        } => {
            let config = parse_config_json(&config)?;
            let added = manager
                .add_source(&id, &plugin_type, config.clone(), name.as_deref(), !disabled)
                .await?;
            if !added {
                let validation = manager.validate_source_config(&plugin_type, &config);
                for error in &validation.errors {
                    eprintln!("  error: {error}");
                }
                return Err(eyre!("source '{id}' was not added"));
            }
            println!("Added source '{id}' ({plugin_type}).");
        }
        SourcesAction::Remove { id } => {
            require_found(manager.remove_source(&id).await?, &id)?;
            println!("Removed source '{id}'.");
        }
        SourcesAction::Enable { id } => {
            require_found(manager.set_enabled(&id, true).await?, &id)?;
            println!("Enabled source '{id}'.");
        }
        SourcesAction::Disable { id } => {
            require_found(manager.set_enabled(&id, false).await?, &id)?;
            println!("Disabled source '{id}'.");
        }
        SourcesAction::Test { id } => {
            let results = match id {
                Some(id) => {
                    let result = manager.test_source(&id).await;
                    vec![(id, result)]
                }
                None => manager.test_all_sources().await,
            };
            if results.is_empty() {
                println!("No enabled sources to test.");
            }
            for (source_id, result) in &results {
                println!("{}", test_line(source_id, result));
            }
        }
        SourcesAction::Validate {
            plugin_type,
            config,
        } => {
            let config = parse_config_json(&config)?;
            let validation = manager.validate_source_config(&plugin_type, &config);
            for error in &validation.errors {
                println!("  error:   {error}");
            }
            for warning in &validation.warnings {
                println!("  warning: {warning}");
            }
            if !validation.valid {
                return Err(eyre!("{plugin_type} configuration is invalid"));
            }
            println!("Configuration is valid.");
        }
        SourcesAction::Types => {
            for plugin_type in manager.available_plugin_types() {
                println!("{plugin_type}");
            }
        }
    }

    Ok(())
}

fn parse_config_json(raw: &str) -> Result<Map<String, Value>> {
    serde_json::from_str(raw).map_err(|e| eyre!("--config must be a JSON object: {e}"))
}

fn require_found(found: bool, id: &str) -> Result<()> {
    if found {
        Ok(())
    } else {
        Err(eyre!("source '{id}' not found"))
    }
}

fn test_line(source_id: &str, result: &TestResult) -> String {
    if result.success {
        format!(
            "  ok    {source_id}: {}",
            result.message.as_deref().unwrap_or("connection successful")
        )
    } else {
        format!(
            "  FAIL  {source_id}: {}",
            result.error.as_deref().unwrap_or("unknown error")
        )
    }
}

// ---------------------------------------------------------------------------
// weekly, test-config, stats
// ---------------------------------------------------------------------------

async fn cmd_weekly_status(settings: Arc<AppConfig>) -> Result<()> {
    let engine = build_engine(&settings).await?;
    let decision = engine.evaluate_weekly_summary().await;
    println!(
        "Weekly summary: {}",
        if decision.due { "due" } else { "not due" }
    );
    println!("  {}", decision.reason);
    Ok(())
}

async fn cmd_test_config(settings: Arc<AppConfig>, json: bool) -> Result<()> {
    let engine = build_engine(&settings).await?;
    let report = engine.test_configuration().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mark = |ok: bool| if ok { "ok" } else { "FAIL" };
    println!("Sources ({} configured):", report.configured_sources);
    for check in &report.source_tests {
        let detail = check.error.as_deref().unwrap_or("");
        println!("  {:<5} {} {detail}", mark(check.success), check.source_id);
    }
    println!("LLM API:        {}", mark(report.llm_api));
    println!("Link enricher:  {}", mark(report.link_enricher));
    println!("Database:       {}", mark(report.database));
    Ok(())
}

async fn cmd_stats(settings: &AppConfig, recent: u32) -> Result<()> {
    let storage = Storage::open(&settings.paths.database_path()).await?;
    let stats = storage.get_statistics().await?;

    println!();
    println!("  Summaries:        {}", stats.summaries_count);
    println!("  Last 7 days:      {}", stats.summaries_last_week);
    println!("  Insights:         {}", stats.insights_count);
    println!("  Questions:        {}", stats.questions_count);
    println!("  Links:            {}", stats.links_count);
    println!("  Processing runs:  {}", stats.processing_runs_count);
    println!(
        "  Last run:         {}",
        stats.last_run.as_deref().unwrap_or("never")
    );
    if !stats.top_sources.is_empty() {
        println!("  Top sources:");
        for (source, n) in &stats.top_sources {
            println!("    {n:>4}  {source}");
        }
    }
    if !stats.top_tags.is_empty() {
        let tags: Vec<String> = stats
            .top_tags
            .iter()
            .map(|(tag, n)| format!("{tag} ({n})"))
            .collect();
        println!("  Top tags:         {}", tags.join(", "));
    }

    let summaries = storage.get_recent_summaries(recent).await?;
    if !summaries.is_empty() {
        println!();
        println!("  Recent summaries:");
        for summary in summaries {
            println!("    {}  {} ({})", summary.date, summary.title, summary.source);
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = init_config(path)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(settings: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(settings)?;
    println!("{toml_str}");
    Ok(())
}
